//! Universal-IM webhook backend client.
//!
//! Events are posted to the backend's webhook (or pushed over a transport
//! server) and replies are correlated through [`CorrelationRegistry`]. In
//! the synchronous regime the call waits on the response slot for at most
//! `reply_timeout_ms`; in the delivery regime it returns a `noop` intent as
//! soon as the send is accepted and replies only arrive via
//! [`BackendClient::handle_callback`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uip_protocol::{
    CanonicalInteractionEvent, InteractionIntent, OutboundCallback, TransportMessage,
};

use crate::correlation::DEFAULT_CORRELATION_TTL;
use crate::retry::send_with_retry;
use crate::{
    BackendClient, BackendError, BackendMode, CallbackResolution, CorrelationRegistry,
    DeliveryHandler, OpenAiCompatClient, OpenAiCompatConfig, OutboundDelivery, OutboundTransport,
    ResolveOutcome, RetryPolicy,
};

pub const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `UniversalImTransport` values.
pub enum UniversalImTransport {
    #[default]
    Webhook,
    Websocket,
    Polling,
}

impl UniversalImTransport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Websocket => "websocket",
            Self::Polling => "polling",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `CorrelationRegime` values.
pub enum CorrelationRegime {
    #[default]
    Synchronous,
    Delivery,
}

#[derive(Debug, Clone)]
/// Public struct `UniversalImConfig` used by the universal-IM client.
pub struct UniversalImConfig {
    pub endpoint: String,
    pub account_id: String,
    pub webhook_path: Option<String>,
    pub secret: Option<String>,
    pub transport: UniversalImTransport,
    pub regime: CorrelationRegime,
    pub request_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    pub max_retries: usize,
    pub fallback_model: String,
    pub correlation_ttl: Duration,
}

impl UniversalImConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            account_id: "default".to_string(),
            webhook_path: None,
            secret: None,
            transport: UniversalImTransport::Webhook,
            regime: CorrelationRegime::Synchronous,
            request_timeout_ms: 30_000,
            reply_timeout_ms: 25_000,
            max_retries: 3,
            fallback_model: "openclaw".to_string(),
            correlation_ttl: DEFAULT_CORRELATION_TTL,
        }
    }

    fn base(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    pub fn webhook_url(&self) -> String {
        let path = match self.webhook_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => format!("/universal-im/{}/webhook", self.account_id),
        };
        if path.starts_with('/') {
            format!("{}{path}", self.base())
        } else {
            format!("{}/{path}", self.base())
        }
    }

    pub fn health_url(&self) -> String {
        format!("{}/universal-im/health", self.base())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookAck {
    #[serde(default = "default_ok")]
    ok: bool,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    replied: Option<bool>,
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn default_ok() -> bool {
    true
}

/// Public struct `UniversalImClient` implementing [`BackendClient`].
pub struct UniversalImClient {
    client: reqwest::Client,
    config: UniversalImConfig,
    registry: CorrelationRegistry,
    fallback: OpenAiCompatClient,
    push: Option<Arc<dyn OutboundTransport>>,
    delivery: Option<DeliveryHandler>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl UniversalImClient {
    pub fn new(config: UniversalImConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(secret) = config.secret.as_deref().filter(|s| !s.trim().is_empty()) {
            headers.insert(
                WEBHOOK_SECRET_HEADER,
                HeaderValue::from_str(secret.trim()).map_err(|e| {
                    BackendError::InvalidResponse(format!("invalid webhook secret header: {e}"))
                })?,
            );
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        let fallback = OpenAiCompatClient::new(OpenAiCompatConfig {
            endpoint: config.endpoint.clone(),
            model: config.fallback_model.clone(),
            api_key: None,
            request_timeout_ms: config.request_timeout_ms,
        })?;
        Ok(Self {
            client,
            registry: CorrelationRegistry::new(config.correlation_ttl),
            config,
            fallback,
            push: None,
            delivery: None,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_push_transport(mut self, push: Arc<dyn OutboundTransport>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn with_delivery_handler(mut self, delivery: DeliveryHandler) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn config(&self) -> &UniversalImConfig {
        &self.config
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    async fn post_webhook(&self, frame: &TransportMessage) -> Result<Option<String>, BackendError> {
        let response = self
            .client
            .post(self.config.webhook_url())
            .json(frame)
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
        let ack = if raw.trim().is_empty() {
            WebhookAck {
                ok: true,
                ..WebhookAck::default()
            }
        } else {
            serde_json::from_str::<WebhookAck>(&raw)?
        };
        if !ack.ok {
            return Err(BackendError::Remote(
                ack.error
                    .unwrap_or_else(|| "webhook rejected the message".to_string()),
            ));
        }
        tracing::debug!(
            message_id = ack.message_id.as_deref().unwrap_or_default(),
            replied = ack.replied.unwrap_or(false),
            "webhook accepted message"
        );
        Ok(ack.reply.filter(|reply| !reply.trim().is_empty()))
    }

    async fn send_primary(
        &self,
        event: &CanonicalInteractionEvent,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, BackendError> {
        let frame = TransportMessage::from_event(event);
        match self.config.transport {
            UniversalImTransport::Webhook => {
                let policy = RetryPolicy::new(self.config.max_retries);
                send_with_retry(policy, cancel, "universal_im_webhook", |_| {
                    self.post_webhook(&frame)
                })
                .await
            }
            UniversalImTransport::Websocket | UniversalImTransport::Polling => {
                let push = self.push.as_ref().ok_or_else(|| {
                    BackendError::Transport(format!(
                        "no {} transport attached",
                        self.config.transport.as_str()
                    ))
                })?;
                push.push(frame)?;
                Ok(None)
            }
        }
    }

    /// Primary send, then a single OpenAI-style attempt before failing.
    async fn send(
        &self,
        event: &CanonicalInteractionEvent,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, BackendError> {
        let primary = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(BackendError::Closed),
            result = self.send_primary(event, cancel) => result,
        };
        let primary_error = match primary {
            Ok(reply) => return Ok(reply),
            Err(error) if error.is_abort() => return Err(error),
            Err(error) => error,
        };
        tracing::warn!(
            interaction_id = %event.interaction_id,
            session_id = %event.session_id(),
            error = %primary_error,
            "primary send failed, trying chat-completions fallback"
        );
        match self.fallback.complete(event, cancel).await {
            Ok(text) => Ok(Some(text)),
            Err(fallback_error) => {
                tracing::error!(
                    interaction_id = %event.interaction_id,
                    error = %fallback_error,
                    "chat-completions fallback failed"
                );
                Err(primary_error)
            }
        }
    }
}

#[async_trait]
impl BackendClient for UniversalImClient {
    fn mode(&self) -> BackendMode {
        BackendMode::UniversalIm
    }

    async fn process_event(
        &self,
        event: &CanonicalInteractionEvent,
        cancel: &CancellationToken,
    ) -> Result<InteractionIntent, BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }

        if self.config.regime == CorrelationRegime::Delivery {
            self.registry.register_session(event);
            return match self.send(event, cancel).await? {
                Some(text) => Ok(InteractionIntent::reply_to(event, text)),
                None => Ok(InteractionIntent::noop_for(event)),
            };
        }

        let (guard, mut receiver) = self.registry.register(event);
        if let Some(text) = self.send(event, cancel).await? {
            return Ok(InteractionIntent::reply_to(event, text));
        }

        let reply_timeout = Duration::from_millis(self.config.reply_timeout_ms.max(1));
        let mut result = tokio::select! {
            received = &mut receiver => received.map_err(|_| {
                BackendError::InvalidResponse("correlation slot dropped".to_string())
            }),
            _ = tokio::time::sleep(reply_timeout) => Err(BackendError::ReplyTimeout),
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            _ = self.shutdown.cancelled() => Err(BackendError::Closed),
        };
        // Later sends fail and resolve as late; a reply already in the slot wins.
        receiver.close();
        if result.is_err() {
            if let Ok(intent) = receiver.try_recv() {
                result = Ok(intent);
            }
        }
        drop(guard);
        if matches!(result, Err(BackendError::ReplyTimeout)) {
            tracing::warn!(
                session_id = %event.session_id(),
                conversation = %event.conversation_id(),
                reply_timeout_ms = self.config.reply_timeout_ms,
                "no reply within wait window, keeping session correlation for late delivery"
            );
        }
        result
    }

    fn handle_callback(&self, callback: OutboundCallback) -> CallbackResolution {
        let target = callback.target();
        let resolution = self.registry.resolve(&target, &callback);
        match resolution.outcome {
            ResolveOutcome::Delivered => {
                tracing::debug!(to = %target, "callback resolved pending wait");
                return resolution;
            }
            ResolveOutcome::Late => {
                tracing::info!(to = %target, "late callback routed to delivery sink");
            }
            ResolveOutcome::Unmatched => {
                tracing::warn!(to = %target, "callback for unknown conversation");
            }
        }
        if let Some(delivery) = &self.delivery {
            delivery(OutboundDelivery {
                callback,
                routing: resolution.routing.clone(),
                outcome: resolution.outcome,
            });
        }
        resolution
    }

    fn purge_expired(&self) -> usize {
        self.registry.purge_expired()
    }

    async fn health(&self) -> Result<(), BackendError> {
        let response = self.client.get(self.config.health_url()).send().await?;
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
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.cancel();
            tracing::info!(endpoint = %self.config.endpoint, "universal-im client closed");
        }
    }
}
