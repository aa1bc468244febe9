//! Forwards late or unmatched backend replies to an external IM system.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uip_protocol::{unix_timestamp_ms, new_uuid};

use crate::retry::send_with_retry;
use crate::{BackendError, OutboundDelivery, RetryPolicy};

#[derive(Debug, Clone)]
pub struct ImWebhookConfig {
    pub url: String,
    pub auth_header: Option<String>,
    pub timeout_ms: u64,
    pub retry_count: usize,
}

/// Public struct `ImWebhookNotifier` used as a delivery sink.
pub struct ImWebhookNotifier {
    client: reqwest::Client,
    config: ImWebhookConfig,
    shutdown: CancellationToken,
}

impl ImWebhookNotifier {
    pub fn new(config: ImWebhookConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(auth) = config.auth_header.as_deref().filter(|v| !v.trim().is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(auth.trim()).map_err(|e| {
                    BackendError::InvalidResponse(format!("invalid authorization header: {e}"))
                })?,
            );
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn payload_for(delivery: &OutboundDelivery) -> Value {
        let callback = &delivery.callback;
        let mut payload = json!({
            "messageId": new_uuid(),
            "timestamp": unix_timestamp_ms(),
            "to": callback.to,
            "text": callback.text,
            "routing": delivery.routing,
        });
        if let Some(media_url) = &callback.media_url {
            payload["mediaUrl"] = json!(media_url);
        }
        if let Some(reply_to_id) = &callback.reply_to_id {
            payload["replyToId"] = json!(reply_to_id);
        }
        if let Some(thread_id) = &callback.thread_id {
            payload["threadId"] = json!(thread_id);
        }
        payload
    }

    async fn post_once(&self, payload: &Value) -> Result<(), BackendError> {
        let response = self.client.post(&self.config.url).json(payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(BackendError::HttpStatus {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }

    pub async fn notify(&self, delivery: &OutboundDelivery) -> Result<(), BackendError> {
        let payload = Self::payload_for(delivery);
        let policy = RetryPolicy::new(self.config.retry_count);
        send_with_retry(policy, &self.shutdown, "im_webhook", |_| self.post_once(&payload)).await
    }

    /// Fire-and-forget variant used from synchronous delivery handlers.
    pub fn spawn_notify(self: &Arc<Self>, delivery: OutboundDelivery) {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = notifier.notify(&delivery).await {
                tracing::error!(to = %delivery.callback.to, error = %error, "im webhook notification failed");
            }
        });
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use uip_protocol::{OutboundCallback, OutboundRouting};

    use super::ImWebhookNotifier;
    use crate::{OutboundDelivery, ResolveOutcome};

    #[test]
    fn unit_payload_includes_optional_fields_only_when_present() {
        let mut callback = OutboundCallback::new("user:u1", "late");
        callback.thread_id = Some("t1".to_string());
        let delivery = OutboundDelivery {
            callback,
            routing: OutboundRouting {
                session_id: Some("s1".to_string()),
                user_id: Some("u1".to_string()),
                channel_id: None,
            },
            outcome: ResolveOutcome::Late,
        };
        let payload = ImWebhookNotifier::payload_for(&delivery);
        assert_eq!(payload["to"], "user:u1");
        assert_eq!(payload["text"], "late");
        assert_eq!(payload["threadId"], "t1");
        assert_eq!(payload["routing"]["sessionId"], "s1");
        assert!(payload.get("mediaUrl").is_none());
        assert!(payload["routing"].get("channelId").is_none());
        assert!(payload["messageId"].as_str().is_some());
    }
}
