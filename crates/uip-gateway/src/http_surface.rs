//! Axum HTTP surface: health, info, the backend's outbound callback
//! endpoints, adapter mounts and transport routes.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uip_backend::{BackendMode, ResolveOutcome};
use uip_protocol::{new_uuid, OutboundCallback};

use crate::transport::{PollingTransport, WebSocketPushServer};
use crate::Gateway;

mod endpoints;
mod entry_handlers;
mod server_bootstrap;
#[cfg(test)]
mod tests;
mod types;

pub use endpoints::*;
use entry_handlers::{
    handle_gateway_health, handle_gateway_info, handle_legacy_callback, handle_outbound_callback,
};
pub use server_bootstrap::{build_gateway_router, run_gateway_server};
pub use types::{ApiError, OutboundResponse};

pub const DEFAULT_OUTBOUND_PATH: &str = "/api/v1/openclaw/outbound";
pub const DEFAULT_LEGACY_CALLBACK_PATH: &str = "/api/v1/callback";
pub const DEFAULT_TRANSPORT_PATH: &str = "/api/v1/openclaw";

#[derive(Debug, Clone)]
/// Public struct `GatewayServerConfig` used across the HTTP surface.
pub struct GatewayServerConfig {
    pub bind: String,
    pub outbound_path: String,
    pub legacy_callback_path: String,
    pub transport_path: String,
    pub outbound_auth_header: Option<String>,
    pub backend_mode: BackendMode,
    pub backend_endpoint: String,
    pub account_id: Option<String>,
    pub backend_transport: Option<String>,
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            outbound_path: DEFAULT_OUTBOUND_PATH.to_string(),
            legacy_callback_path: DEFAULT_LEGACY_CALLBACK_PATH.to_string(),
            transport_path: DEFAULT_TRANSPORT_PATH.to_string(),
            outbound_auth_header: None,
            backend_mode: BackendMode::default(),
            backend_endpoint: String::new(),
            account_id: None,
            backend_transport: None,
        }
    }
}

impl GatewayServerConfig {
    pub fn transport_ws_path(&self) -> String {
        format!("{}{TRANSPORT_WS_SUFFIX}", self.transport_path)
    }

    pub fn transport_poll_path(&self) -> String {
        format!("{}{TRANSPORT_POLL_SUFFIX}", self.transport_path)
    }

    pub fn transport_inbound_path(&self) -> String {
        format!("{}{TRANSPORT_INBOUND_SUFFIX}", self.transport_path)
    }
}

#[derive(Clone)]
/// Shared state behind every gateway route.
pub struct GatewayServerState {
    pub gateway: Gateway,
    pub ws_push: Option<Arc<WebSocketPushServer>>,
    pub polling: Option<Arc<PollingTransport>>,
    pub config: GatewayServerConfig,
}

impl GatewayServerState {
    pub fn new(gateway: Gateway, config: GatewayServerConfig) -> Self {
        Self {
            gateway,
            ws_push: None,
            polling: None,
            config,
        }
    }

    pub fn with_ws_push(mut self, ws_push: Arc<WebSocketPushServer>) -> Self {
        self.ws_push = Some(ws_push);
        self
    }

    pub fn with_polling(mut self, polling: Arc<PollingTransport>) -> Self {
        self.polling = Some(polling);
        self
    }

    fn authorize_outbound(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = self
            .config
            .outbound_auth_header
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return Ok(());
        };
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::trim);
        if presented == Some(expected) {
            Ok(())
        } else {
            Err(ApiError::unauthorized())
        }
    }
}

fn parse_outbound_callback(body: &[u8]) -> Result<OutboundCallback, ApiError> {
    let callback: OutboundCallback = serde_json::from_slice(body)
        .map_err(|error| ApiError::invalid_body(format!("Invalid request body: {error}")))?;
    callback.validate()?;
    Ok(callback)
}
