use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uip_backend::{BackendError, OutboundTransport};
use uip_protocol::{new_uuid, parse_transport_message, TransportMessage};

use super::TransportMessageHandler;

pub const DEFAULT_PUSH_QUEUE: usize = 100;
const CONNECTION_BUFFER: usize = 64;
const PING_INTERVAL: Duration = Duration::from_secs(30);

struct PushConnection {
    id: String,
    sender: mpsc::Sender<WsMessage>,
}

struct BroadcastTask {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// WebSocket server backend workers connect to. Outbound frames are queued
/// and broadcast to every open connection; inbound frames go to the
/// registered handler.
pub struct WebSocketPushServer {
    queue_tx: mpsc::Sender<TransportMessage>,
    queue_rx: Mutex<Option<mpsc::Receiver<TransportMessage>>>,
    connections: Arc<RwLock<Vec<PushConnection>>>,
    handler: RwLock<Option<TransportMessageHandler>>,
    dropped: AtomicU64,
    task: Mutex<Option<BroadcastTask>>,
}

impl WebSocketPushServer {
    pub fn new(queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            connections: Arc::new(RwLock::new(Vec::new())),
            handler: RwLock::new(None),
            dropped: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    pub fn on_message(&self, handler: TransportMessageHandler) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
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

    /// Spawns the broadcast task. Calling it twice is a no-op.
    pub fn start(&self) {
        let Some(mut queue_rx) = self
            .queue_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let connections = Arc::clone(&self.connections);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    next = queue_rx.recv() => {
                        let Some(message) = next else {
                            break;
                        };
                        broadcast(&connections, &message);
                    }
                }
            }
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(BroadcastTask { shutdown_tx, handle });
    }

    /// Stops broadcasting and closes every connection.
    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.shutdown_tx.send(());
            let _ = task.handle.await;
        }
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn router(self: &Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, get(handle_push_ws))
            .with_state(Arc::clone(self))
    }

    fn handle_inbound(&self, raw: &str) {
        match parse_transport_message(raw) {
            Ok(message) => {
                let handler = self
                    .handler
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match handler {
                    Some(handler) => handler(message),
                    None => tracing::warn!(
                        message_id = %message.message_id,
                        "push transport frame received without a handler"
                    ),
                }
            }
            Err(error) => tracing::warn!(error = %error, "discarding malformed push transport frame"),
        }
    }
}

impl Default for WebSocketPushServer {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_QUEUE)
    }
}

impl OutboundTransport for WebSocketPushServer {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn push(&self, message: TransportMessage) -> Result<(), BackendError> {
        match self.queue_tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(message_id = %message.message_id, "push queue full, dropping frame");
                Err(BackendError::Transport("push queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(BackendError::Transport("push transport stopped".to_string()))
            }
        }
    }
}

fn broadcast(connections: &RwLock<Vec<PushConnection>>, message: &TransportMessage) {
    let raw = match serde_json::to_string(message) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(error = %error, "failed to encode push frame");
            return;
        }
    };
    let connections = connections.read().unwrap_or_else(PoisonError::into_inner);
    if connections.is_empty() {
        tracing::debug!(message_id = %message.message_id, "no push connections, frame discarded");
    }
    for connection in connections.iter() {
        if connection
            .sender
            .try_send(WsMessage::Text(raw.clone().into()))
            .is_err()
        {
            tracing::warn!(connection_id = %connection.id, "push connection lagging, frame skipped");
        }
    }
}

async fn handle_push_ws(
    State(server): State<Arc<WebSocketPushServer>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_push_connection(server, socket))
}

async fn run_push_connection(server: Arc<WebSocketPushServer>, socket: WebSocket) {
    let id = new_uuid();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(CONNECTION_BUFFER);
    server
        .connections
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(PushConnection {
            id: id.clone(),
            sender: outbound_tx,
        });
    tracing::info!(connection_id = %id, "push transport client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut heartbeat = tokio::time::interval(PING_INTERVAL);
    heartbeat.tick().await;
    loop {
        tokio::select! {
            inbound = receiver.next() => {
                let Some(Ok(message)) = inbound else {
                    break;
                };
                match message {
                    WsMessage::Text(text) => server.handle_inbound(text.as_str()),
                    WsMessage::Ping(payload) => {
                        if sender.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    WsMessage::Binary(_) | WsMessage::Pong(_) => {}
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

    server
        .connections
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|connection| connection.id != id);
    tracing::info!(connection_id = %id, "push transport client disconnected");
}
