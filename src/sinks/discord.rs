use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::agents::executor::ExecutionResult;
use crate::error::{ButlerError, Result};
use crate::sinks::ResultSink;

const SUCCESS_COLOR: u32 = 0x2ECC71;
const FALLBACK_COLOR: u32 = 0xFFA500;
/// Longest field value Discord accepts in an embed.
const MAX_FIELD_LEN: usize = 1024;

/// Posts execution results to a Discord webhook. Fallbacks are always
/// posted, successes only when `notify_on_success` is set.
pub struct DiscordWebhook {
    client: Client,
    webhook_url: String,
    notify_on_success: bool,
    rate_limiter: Semaphore,
}

impl DiscordWebhook {
    pub fn new(webhook_url: String, notify_on_success: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                ButlerError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            webhook_url,
            notify_on_success,
            // Discord allows 5 requests per 2 seconds
            rate_limiter: Semaphore::new(5),
        })
    }

    pub fn should_notify(&self, result: &ExecutionResult) -> bool {
        !result.is_success() || self.notify_on_success
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ButlerError::NetworkError(format!("Failed to send webhook: {}", e)))?;
        Ok(response)
    }

    async fn send_webhook(&self, payload: Value) -> Result<()> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ButlerError::NetworkError(format!("Rate limiter error: {}", e)))?;

        let mut response = self.post(&payload).await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!("Discord webhook rate limited, retrying once");
            sleep(Duration::from_secs(2)).await;
            response = self.post(&payload).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ButlerError::NetworkError(format!(
                "Discord webhook failed with status {}: {}",
                status, body
            ))
            .into());
        }

        debug!("Discord webhook sent successfully");
        sleep(Duration::from_millis(400)).await;
        Ok(())
    }

    pub fn create_result_embed(&self, result: &ExecutionResult) -> Value {
        let (title, color) = if result.is_success() {
            (format!("✅ {} finished", result.agent), SUCCESS_COLOR)
        } else {
            (format!("⚠️ {} fell back", result.agent), FALLBACK_COLOR)
        };

        let mut fields = vec![json!({
            "name": "Run",
            "value": result.run_id.to_string(),
            "inline": true
        })];

        if let Some(error) = result.error() {
            fields.push(json!({
                "name": "Error",
                "value": truncate(error, MAX_FIELD_LEN),
                "inline": false
            }));
        }

        if let Some(message) = result.data().get("message").and_then(Value::as_str) {
            fields.push(json!({
                "name": "Message",
                "value": truncate(message, MAX_FIELD_LEN),
                "inline": false
            }));
        }

        json!({
            "embeds": [{
                "title": title,
                "color": color,
                "fields": fields,
                "timestamp": result.finished_at.to_rfc3339(),
                "footer": { "text": "Personal Butler" }
            }]
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

#[async_trait]
impl ResultSink for DiscordWebhook {
    fn name(&self) -> &str {
        "discord"
    }

    async fn deliver(&self, result: &ExecutionResult) -> Result<()> {
        if !self.should_notify(result) {
            return Ok(());
        }
        let payload = self.create_result_embed(result);
        self.send_webhook(payload).await
    }
}
