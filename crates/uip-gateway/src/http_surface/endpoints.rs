//! Fixed endpoint paths; configurable ones live in `GatewayServerConfig`.

pub const HEALTH_ENDPOINT: &str = "/health";
pub const INFO_ENDPOINT: &str = "/api/v1/info";
pub const TRANSPORT_WS_SUFFIX: &str = "/ws";
pub const TRANSPORT_POLL_SUFFIX: &str = "/poll";
pub const TRANSPORT_INBOUND_SUFFIX: &str = "/inbound";
pub const PROTOCOL_NAME: &str = "UIP v1.0";
