pub mod auth;
pub mod stream;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::agents::{
    manual_task, AgentMetrics, ExecutionResult, Orchestrator, OrchestratorStatus, TaskPayload,
};
use crate::api::auth::auth_middleware;
use crate::config::ServerConfig;
use crate::error::{ButlerError, Result};

pub type SharedOrchestrator = Arc<RwLock<Orchestrator>>;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T>(data: T) -> ApiResult<T> {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure<T>(status: StatusCode, message: String) -> ApiResult<T> {
    (status, Json(ApiResponse::error(message)))
}

/// HTTP status for an error surfaced by the orchestrator.
fn status_for(error: &(dyn std::error::Error + Send + Sync + 'static)) -> StatusCode {
    match error.downcast_ref::<ButlerError>() {
        Some(ButlerError::UnknownAgent(_)) => StatusCode::NOT_FOUND,
        Some(ButlerError::InvalidState(_)) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn create_router(orchestrator: SharedOrchestrator, server: Arc<ServerConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/status", get(get_orchestrator_status))
        .route("/agents", get(list_agents))
        .route("/agents/:name/metrics", get(get_agent_metrics))
        .route("/agents/:name/run", post(run_agent))
        .merge(stream::create_stream_router())
        .route_layer(middleware::from_fn_with_state(server, auth_middleware));

    Router::new()
        .route("/", get(root))
        .merge(protected_routes)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Serve the API until `shutdown` resolves.
pub async fn start_api_server(
    orchestrator: SharedOrchestrator,
    server: Arc<ServerConfig>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(orchestrator, server.clone());

    let addr = format!("{}:{}", server.bind_address, server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Personal Butler is running." }))
}

async fn get_orchestrator_status(
    State(orchestrator): State<SharedOrchestrator>,
) -> Json<ApiResponse<OrchestratorStatus>> {
    let status = orchestrator.read().await.status().await;
    Json(ApiResponse::success(status))
}

async fn list_agents(State(orchestrator): State<SharedOrchestrator>) -> Json<ApiResponse<Vec<String>>> {
    let names = orchestrator.read().await.agent_names();
    Json(ApiResponse::success(names))
}

async fn get_agent_metrics(
    State(orchestrator): State<SharedOrchestrator>,
    Path(name): Path<String>,
) -> ApiResult<AgentMetrics> {
    match orchestrator.read().await.metrics(&name).await {
        Some(metrics) => ok(metrics),
        None => failure(StatusCode::NOT_FOUND, format!("Agent {} not found", name)),
    }
}

/// Run an agent now. The body, when present, is the task; otherwise the
/// task is `{"trigger": "manual"}`.
async fn run_agent(
    State(orchestrator): State<SharedOrchestrator>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<ExecutionResult> {
    let task = if body.iter().all(u8::is_ascii_whitespace) {
        manual_task()
    } else {
        match serde_json::from_slice::<TaskPayload>(&body) {
            Ok(task) => task,
            Err(e) => {
                return failure(
                    StatusCode::BAD_REQUEST,
                    format!("Task must be a JSON object: {}", e),
                )
            }
        }
    };

    // Release the lock before running so long tasks don't block shutdown.
    let runner = match orchestrator.read().await.task_runner(&name) {
        Ok(runner) => runner,
        Err(e) => return failure(status_for(e.as_ref()), e.to_string()),
    };

    match runner.run(task).await {
        Ok(result) => ok(result),
        Err(e) => {
            error!("On-demand run of {} failed: {}", name, e);
            failure(status_for(e.as_ref()), e.to_string())
        }
    }
}
