//! Built-in HTTP / WebSocket front-end adapter.
//!
//! `POST {http_path}/message` accepts a message and answers immediately;
//! the reply is pushed to the WebSocket connected at
//! `GET {http_path}/ws?sessionId=` for the same session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uip_protocol::{
    new_uuid, resolve_session_key, CanonicalInteractionEvent, ConversationKind, InputPayload,
    InputType, InteractionIntent, SurfaceCapabilities, UipError,
};

use crate::http_surface::ApiError;
use crate::{AdapterFactory, EventHandler, FrontEndAdapter, GatewayError};

pub const LOCAL_ADAPTER_NAME: &str = "local";
pub const LOCAL_DEFAULT_HTTP_PATH: &str = "/api/v1/local";
pub const LOCAL_MESSAGE_ENDPOINT: &str = "/message";
pub const LOCAL_WS_ENDPOINT: &str = "/ws";
pub const LOCAL_HEALTH_ENDPOINT: &str = "/health";
const DEFAULT_USER_ID: &str = "anonymous";

#[derive(Debug, Clone)]
pub struct LocalAdapterConfig {
    pub name: String,
    pub http_path: String,
    pub send_buffer: usize,
    pub ping_interval: Duration,
    pub max_message_bytes: usize,
}

impl Default for LocalAdapterConfig {
    fn default() -> Self {
        Self {
            name: LOCAL_ADAPTER_NAME.to_string(),
            http_path: LOCAL_DEFAULT_HTTP_PATH.to_string(),
            send_buffer: 256,
            ping_interval: Duration::from_secs(30),
            max_message_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Body of `POST {http_path}/message`.
pub struct LocalMessageRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub conversation_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LocalWsFrame {
    #[serde(default)]
    text: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalWsQuery {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Parses and validates a message request body.
pub fn parse_message_request(raw: &[u8]) -> Result<LocalMessageRequest, UipError> {
    let request: LocalMessageRequest = serde_json::from_slice(raw)
        .map_err(|error| UipError::protocol(format!("Invalid request body: {error}")))?;
    if request.text.trim().is_empty() {
        return Err(UipError::protocol("text is required"));
    }
    if let Some(kind) = request.kind.as_deref() {
        InputType::parse(kind)?;
    }
    if let Some(kind) = request.conversation_type.as_deref().filter(|k| !k.trim().is_empty()) {
        ConversationKind::parse(kind)?;
    }
    Ok(request)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Public struct `LocalAdapter` serving the built-in HTTP/WS surface.
pub struct LocalAdapter {
    config: LocalAdapterConfig,
    handler: RwLock<Option<EventHandler>>,
    connections: RwLock<HashMap<String, mpsc::Sender<WsMessage>>>,
    dropped: AtomicU64,
    shutdown: RwLock<CancellationToken>,
}

impl LocalAdapter {
    pub fn new(config: LocalAdapterConfig) -> Self {
        Self {
            config,
            handler: RwLock::new(None),
            connections: RwLock::new(HashMap::new()),
            dropped: AtomicU64::new(0),
            shutdown: RwLock::new(CancellationToken::new()),
        }
    }

    pub fn config(&self) -> &LocalAdapterConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(LOCAL_MESSAGE_ENDPOINT, post(handle_local_message))
            .route(LOCAL_WS_ENDPOINT, get(handle_local_ws))
            .route(LOCAL_HEALTH_ENDPOINT, get(handle_local_health))
            .with_state(Arc::clone(self))
    }

    fn emit(&self, event: CanonicalInteractionEvent) -> Result<(), UipError> {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let handler = handler.ok_or_else(|| UipError::gateway("adapter is not attached to a gateway"))?;
        handler(event);
        Ok(())
    }

    /// Converts a validated request into a canonical event.
    pub fn event_from_request(&self, request: &LocalMessageRequest) -> Result<CanonicalInteractionEvent, UipError> {
        let kind = InputType::parse(request.kind.as_deref().unwrap_or_default())?;
        let channel_id = non_empty(request.channel_id.as_deref());
        let conversation_type = match non_empty(request.conversation_type.as_deref()) {
            Some(raw) => ConversationKind::parse(raw)?,
            None if channel_id.is_some() => ConversationKind::Channel,
            None => ConversationKind::Direct,
        };
        let mut payload = InputPayload::text(request.text.clone()).with_conversation_type(conversation_type);
        if let Some(channel_id) = channel_id {
            payload = payload.with_channel(channel_id);
        }
        let session_id = resolve_session_key(request.session_id.as_deref(), channel_id);
        let user_id = non_empty(request.user_id.as_deref()).unwrap_or(DEFAULT_USER_ID);
        Ok(CanonicalInteractionEvent::new(
            session_id,
            user_id,
            kind,
            payload,
            self.capabilities(),
            self.config.name.clone(),
        ))
    }

    fn attach(&self, session_id: &str, sender: mpsc::Sender<WsMessage>) {
        let previous = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), sender);
        if previous.is_some() {
            tracing::info!(session_id, "websocket session reconnected, replacing previous connection");
        }
    }

    fn detach(&self, session_id: &str, sender: &mpsc::Sender<WsMessage>) {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if connections
            .get(session_id)
            .is_some_and(|current| current.same_channel(sender))
        {
            connections.remove(session_id);
        }
    }

    fn handle_ws_text(
        &self,
        session_id: &str,
        user_id: &str,
        raw: &str,
        outbound: &mpsc::Sender<WsMessage>,
    ) {
        let result = serde_json::from_str::<LocalWsFrame>(raw)
            .map_err(|error| UipError::protocol(format!("invalid websocket frame: {error}")))
            .and_then(|frame| {
                if frame.text.trim().is_empty() {
                    return Err(UipError::protocol("text is required"));
                }
                let kind = InputType::parse(frame.kind.as_deref().unwrap_or_default())?;
                Ok(CanonicalInteractionEvent::new(
                    session_id,
                    user_id,
                    kind,
                    InputPayload::text(frame.text).with_conversation_type(ConversationKind::Direct),
                    self.capabilities(),
                    self.config.name.clone(),
                ))
            })
            .and_then(|event| self.emit(event));
        if let Err(error) = result {
            tracing::debug!(session_id, error = %error, "rejected websocket frame");
            let frame = json!({"type": "error", "error": error});
            let _ = outbound.try_send(WsMessage::Text(frame.to_string().into()));
        }
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl FrontEndAdapter for LocalAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn start(&self, cancel: CancellationToken) -> Result<(), GatewayError> {
        *self.shutdown.write().unwrap_or_else(PoisonError::into_inner) = cancel;
        tracing::info!(adapter = %self.config.name, http_path = %self.config.http_path, "local adapter started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        self.shutdown_token().cancel();
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    fn on_event(&self, handler: EventHandler) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    async fn send_intent(&self, intent: &InteractionIntent) -> Result<(), GatewayError> {
        if intent.is_noop() {
            tracing::debug!(session_id = %intent.target_session_id, "skipping noop intent");
            return Ok(());
        }
        let sender = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&intent.target_session_id)
            .cloned()
            .ok_or_else(|| GatewayError::SessionNotConnected(intent.target_session_id.clone()))?;
        let raw = serde_json::to_string(intent)?;
        match sender.try_send(WsMessage::Text(raw.into())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    session_id = %intent.target_session_id,
                    buffer = self.config.send_buffer,
                    "websocket send buffer full, dropping intent"
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                self.detach(&intent.target_session_id, &sender);
                Err(GatewayError::SessionNotConnected(intent.target_session_id.clone()))
            }
        }
    }

    fn capabilities(&self) -> SurfaceCapabilities {
        SurfaceCapabilities {
            supports_reply: true,
            supports_edit: true,
            supports_reaction: false,
            supports_thread: false,
            supports_attachment: false,
            supports_markdown: true,
        }
    }

    fn http_path(&self) -> Option<String> {
        Some(self.config.http_path.clone())
    }

    fn http_mount(self: Arc<Self>) -> Option<(String, Router)> {
        let path = self.http_path()?;
        Some((path, self.router()))
    }
}

/// Factory for the adapter registry. Reads optional `name` and
/// `http_path` settings.
pub fn local_adapter_factory() -> AdapterFactory {
    Box::new(|settings: &Value| {
        let mut config = LocalAdapterConfig::default();
        if let Some(name) = settings.get("name").and_then(Value::as_str) {
            config.name = name.to_string();
        }
        if let Some(http_path) = settings.get("http_path").and_then(Value::as_str) {
            config.http_path = http_path.to_string();
        }
        let adapter: Arc<dyn FrontEndAdapter> = Arc::new(LocalAdapter::new(config));
        Ok(adapter)
    })
}

async fn handle_local_message(
    State(adapter): State<Arc<LocalAdapter>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = parse_message_request(&body)?;
    let event = adapter.event_from_request(&request)?;
    let session_id = event.session_id().to_string();
    let interaction_id = event.interaction_id.clone();
    let trace_id = event.meta.trace_id.clone();
    adapter
        .emit(event)
        .map_err(|error| ApiError::unavailable(error.message).with_trace_id(trace_id))?;
    Ok(Json(json!({
        "success": true,
        "sessionId": session_id,
        "interactionId": interaction_id,
    })))
}

async fn handle_local_ws(
    State(adapter): State<Arc<LocalAdapter>>,
    Query(query): Query<LocalWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let session_id = non_empty(query.session_id.as_deref())
        .map(str::to_string)
        .unwrap_or_else(new_uuid);
    let user_id = non_empty(query.user_id.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| format!("ws-user-{}", session_id.chars().take(8).collect::<String>()));
    let max_message_bytes = adapter.config.max_message_bytes;
    ws.max_message_size(max_message_bytes)
        .on_upgrade(move |socket| run_local_ws_connection(adapter, socket, session_id, user_id))
}

async fn handle_local_health(State(adapter): State<Arc<LocalAdapter>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "adapter": adapter.config.name,
        "connections": adapter.connection_count(),
    }))
}

async fn run_local_ws_connection(
    adapter: Arc<LocalAdapter>,
    socket: WebSocket,
    session_id: String,
    user_id: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(adapter.config.send_buffer.max(1));
    adapter.attach(&session_id, outbound_tx.clone());
    let shutdown = adapter.shutdown_token();
    let mut heartbeat = tokio::time::interval(adapter.config.ping_interval.max(Duration::from_millis(1)));
    heartbeat.tick().await;
    tracing::debug!(session_id = %session_id, user_id = %user_id, "websocket connected");

    let greeting = json!({"type": "connected", "sessionId": session_id, "userId": user_id});
    if sender
        .send(WsMessage::Text(greeting.to_string().into()))
        .await
        .is_ok()
    {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
                inbound = receiver.next() => {
                    let Some(Ok(message)) = inbound else {
                        break;
                    };
                    match message {
                        WsMessage::Text(text) => {
                            adapter.handle_ws_text(&session_id, &user_id, text.as_str(), &outbound_tx);
                        }
                        WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                            Ok(text) => adapter.handle_ws_text(&session_id, &user_id, text, &outbound_tx),
                            Err(_) => tracing::debug!(session_id = %session_id, "ignoring non UTF-8 binary frame"),
                        },
                        WsMessage::Ping(payload) => {
                            if sender.send(WsMessage::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        WsMessage::Pong(_) => {}
                        WsMessage::Close(_) => break,
                    }
                }
                outbound = outbound_rx.recv() => {
                    let Some(message) = outbound else {
                        break;
                    };
                    if sender.send(message).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    adapter.detach(&session_id, &outbound_tx);
    tracing::debug!(session_id = %session_id, "websocket disconnected");
}
