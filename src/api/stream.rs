use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::api::SharedOrchestrator;

pub fn create_stream_router() -> Router<SharedOrchestrator> {
    Router::new().route("/events", get(sse_handler))
}

/// Server-sent stream of orchestrator events. Slow clients skip what they
/// missed instead of being disconnected.
async fn sse_handler(
    State(orchestrator): State<SharedOrchestrator>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = orchestrator.read().await.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => yield Ok(Event::default().data(json)),
                    Err(e) => warn!("Failed to serialize orchestrator event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream subscriber lagged, skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Orchestrator event channel closed, ending stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keep-alive"),
    )
}
