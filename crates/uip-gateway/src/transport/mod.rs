//! Backend-facing push transports. Both implement
//! [`uip_backend::OutboundTransport`] so the universal-IM client can hand
//! them frames without blocking, and both accept frames originated by the
//! backend through [`TransportMessageHandler`].

use std::sync::Arc;

use uip_protocol::TransportMessage;

pub mod polling;
pub mod websocket;

pub use polling::{PollingTransport, DEFAULT_POLL_BUFFER};
pub use websocket::{WebSocketPushServer, DEFAULT_PUSH_QUEUE};

pub type TransportMessageHandler = Arc<dyn Fn(TransportMessage) + Send + Sync>;
