use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uip_backend::{BackendError, OutboundTransport};
use uip_protocol::{unix_timestamp_ms, parse_transport_message, TransportMessage, UipError};

use super::TransportMessageHandler;
use crate::http_surface::ApiError;

pub const DEFAULT_POLL_BUFFER: usize = 1000;

#[derive(Debug, Default, Deserialize)]
struct PollQuery {
    #[serde(default)]
    since: u64,
}

#[derive(Default)]
struct PollBuffer {
    entries: VecDeque<TransportMessage>,
    last_timestamp: u64,
}

/// Long-poll transport: outbound frames are kept in a bounded ring buffer
/// and served by timestamp; inbound frames arrive via POST.
pub struct PollingTransport {
    capacity: usize,
    buffer: Mutex<PollBuffer>,
    handler: RwLock<Option<TransportMessageHandler>>,
}

impl PollingTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: Mutex::new(PollBuffer::default()),
            handler: RwLock::new(None),
        }
    }

    pub fn on_message(&self, handler: TransportMessageHandler) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn len(&self) -> usize {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffered frames stamped strictly after `since`, oldest first.
    pub fn poll(&self, since: u64) -> Vec<TransportMessage> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .filter(|message| message.timestamp > since)
            .cloned()
            .collect()
    }

    /// Passes an inbound frame to the handler.
    pub fn accept(&self, message: TransportMessage) -> Result<(), UipError> {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| UipError::gateway("polling transport has no inbound handler"))?;
        handler(message);
        Ok(())
    }

    pub fn router(self: &Arc<Self>, poll_path: &str, inbound_path: &str) -> Router {
        Router::new()
            .route(poll_path, get(handle_poll))
            .route(inbound_path, post(handle_inbound))
            .with_state(Arc::clone(self))
    }
}

impl Default for PollingTransport {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_BUFFER)
    }
}

impl OutboundTransport for PollingTransport {
    fn name(&self) -> &'static str {
        "polling"
    }

    /// Restamps the frame so timestamps in the buffer strictly increase and
    /// `since` cursors never skip or repeat a frame.
    fn push(&self, mut message: TransportMessage) -> Result<(), BackendError> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let timestamp = unix_timestamp_ms().max(buffer.last_timestamp + 1);
        buffer.last_timestamp = timestamp;
        message.timestamp = timestamp;
        if buffer.entries.len() == self.capacity {
            buffer.entries.pop_front();
        }
        buffer.entries.push_back(message);
        Ok(())
    }
}

async fn handle_poll(
    State(transport): State<Arc<PollingTransport>>,
    Query(query): Query<PollQuery>,
) -> Json<Value> {
    let messages = transport.poll(query.since);
    let cursor = messages.last().map(|message| message.timestamp).unwrap_or(query.since);
    Json(json!({
        "messages": messages,
        "cursor": cursor,
    }))
}

async fn handle_inbound(
    State(transport): State<Arc<PollingTransport>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let raw = std::str::from_utf8(&body).map_err(|_| ApiError::invalid_body("body is not UTF-8"))?;
    let message = parse_transport_message(raw)?;
    transport
        .accept(message)
        .map_err(|error| ApiError::unavailable(error.message))?;
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use uip_backend::OutboundTransport;
    use uip_protocol::{OutboundCallback, TransportMessage};

    use super::PollingTransport;

    fn frame(text: &str) -> TransportMessage {
        TransportMessage::from_callback(&OutboundCallback::new("user:u1", text))
    }

    #[test]
    fn unit_poll_returns_frames_after_cursor_in_order() {
        let transport = PollingTransport::default();
        transport.push(frame("a")).expect("push");
        transport.push(frame("b")).expect("push");
        transport.push(frame("c")).expect("push");

        let all = transport.poll(0);
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));

        let rest = transport.poll(all[0].timestamp);
        let texts: Vec<&str> = rest.iter().map(|message| message.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c"]);
        assert!(transport.poll(all[2].timestamp).is_empty());
    }

    #[test]
    fn unit_ring_buffer_evicts_oldest() {
        let transport = PollingTransport::new(2);
        transport.push(frame("a")).expect("push");
        transport.push(frame("b")).expect("push");
        transport.push(frame("c")).expect("push");
        assert_eq!(transport.len(), 2);
        let texts: Vec<String> = transport.poll(0).into_iter().map(|message| message.text).collect();
        assert_eq!(texts, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn unit_accept_requires_handler() {
        let transport = PollingTransport::default();
        assert!(transport.accept(frame("x")).is_err());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        transport.on_message(Arc::new(move |message| sink.lock().expect("lock").push(message.text)));
        transport.accept(frame("x")).expect("accepted");
        assert_eq!(seen.lock().expect("lock").as_slice(), ["x".to_string()]);
    }
}
