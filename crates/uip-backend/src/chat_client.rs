//! Legacy request/response chat backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uip_protocol::{CanonicalInteractionEvent, IntentType, InteractionIntent};

use crate::retry::send_with_retry;
use crate::{BackendClient, BackendError, BackendMode, RetryPolicy};

#[derive(Debug, Clone)]
/// Public struct `ChatClientConfig` used by the legacy chat backend.
pub struct ChatClientConfig {
    pub endpoint: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    response: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Posts every event to `{endpoint}/api/v1/chat` and maps the response body
/// straight into an intent.
pub struct ChatBackendClient {
    client: reqwest::Client,
    config: ChatClientConfig,
    closed: AtomicBool,
}

impl ChatBackendClient {
    pub fn new(config: ChatClientConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            config,
            closed: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.endpoint.trim_end_matches('/'))
    }

    async fn post_chat(&self, event: &CanonicalInteractionEvent) -> Result<ChatReply, BackendError> {
        let mut metadata = json!({
            "traceId": event.meta.trace_id,
            "source": event.meta.source,
            "interactionId": event.interaction_id,
        });
        if let Some(channel_id) = event.channel_id() {
            metadata["channelId"] = json!(channel_id);
        }
        let body = json!({
            "sessionId": event.session_id(),
            "userId": event.user_id(),
            "message": event.text(),
            "type": event.input.kind.as_str(),
            "metadata": metadata,
        });
        let response = self
            .client
            .post(self.url("/api/v1/chat"))
            .header("X-Trace-ID", event.meta.trace_id.as_str())
            .header("X-Session-ID", event.session_id())
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::HttpStatus {
                status: status.as_u16(),
                body: raw,
            });
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl BackendClient for ChatBackendClient {
    fn mode(&self) -> BackendMode {
        BackendMode::Chat
    }

    async fn process_event(
        &self,
        event: &CanonicalInteractionEvent,
        cancel: &CancellationToken,
    ) -> Result<InteractionIntent, BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        let policy = RetryPolicy::new(self.config.max_retries);
        let reply = send_with_retry(policy, cancel, "chat", |_| self.post_chat(event)).await?;
        if let Some(error) = reply.error.filter(|error| !error.trim().is_empty()) {
            return Err(BackendError::Remote(error));
        }
        let intent_type = IntentType::from_backend_label(reply.kind.as_deref());
        Ok(InteractionIntent::typed_reply_to(event, intent_type, reply.response))
    }

    async fn health(&self) -> Result<(), BackendError> {
        let response = self.client.get(self.url("/health")).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(BackendError::HttpStatus {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
