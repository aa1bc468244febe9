//! Event dispatch core, front-end adapters, backend-facing transports and
//! the HTTP surface of the interaction gateway.

pub mod adapter;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod http_surface;
pub mod local_adapter;
pub mod session_registry;
pub mod transport;

pub use adapter::*;
pub use delivery::build_delivery_fanout;
pub use dispatch::*;
pub use error::*;
pub use http_surface::{build_gateway_router, run_gateway_server, GatewayServerConfig, GatewayServerState};
pub use local_adapter::*;
pub use session_registry::*;
pub use transport::{PollingTransport, TransportMessageHandler, WebSocketPushServer};
