//! TOML configuration for the gateway daemon. Every section and key is
//! optional; a missing file yields the defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uip_backend::{
    BackendMode, ChatClientConfig, CorrelationRegime, ImWebhookConfig, UniversalImConfig,
    UniversalImTransport,
};
use uip_gateway::{GatewayConfig, GatewayServerConfig};

use crate::Cli;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {message}")]
    Parse { message: String },

    #[error("invalid config value `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
/// Public struct `GatewayFileConfig` mirroring the TOML file layout.
pub struct GatewayFileConfig {
    pub server: ServerSection,
    pub gateway: DispatchSection,
    pub session: SessionSection,
    pub backend: BackendSection,
    pub adapters: AdaptersSection,
    pub im_webhook: ImWebhookSection,
    pub observability: ObservabilitySection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub shutdown_timeout_ms: u64,
    pub outbound_path: String,
    pub legacy_callback_path: String,
    pub transport_path: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            shutdown_timeout_ms: 10_000,
            outbound_path: uip_gateway::http_surface::DEFAULT_OUTBOUND_PATH.to_string(),
            legacy_callback_path: uip_gateway::http_surface::DEFAULT_LEGACY_CALLBACK_PATH
                .to_string(),
            transport_path: uip_gateway::http_surface::DEFAULT_TRANSPORT_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchSection {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub dispatch_timeout_ms: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_capacity: 1_000,
            dispatch_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSection {
    pub ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub correlation_ttl_seconds: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_seconds: 86_400,
            cleanup_interval_seconds: 300,
            correlation_ttl_seconds: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSection {
    pub mode: BackendMode,
    pub endpoint: String,
    pub request_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    pub max_retries: usize,
    pub universal_im: UniversalImSection,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            mode: BackendMode::UniversalIm,
            endpoint: "http://localhost:18789".to_string(),
            request_timeout_ms: 30_000,
            reply_timeout_ms: 25_000,
            max_retries: 3,
            universal_im: UniversalImSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UniversalImSection {
    pub account_id: String,
    pub webhook_path: Option<String>,
    pub secret: Option<String>,
    pub transport: UniversalImTransport,
    pub regime: CorrelationRegime,
    pub outbound_auth_header: Option<String>,
    pub fallback_model: String,
}

impl Default for UniversalImSection {
    fn default() -> Self {
        Self {
            account_id: "default".to_string(),
            webhook_path: None,
            secret: None,
            transport: UniversalImTransport::Webhook,
            regime: CorrelationRegime::Synchronous,
            outbound_auth_header: None,
            fallback_model: "openclaw".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptersSection {
    pub local: LocalAdapterSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalAdapterSection {
    pub enabled: bool,
    pub http_path: String,
}

impl Default for LocalAdapterSection {
    fn default() -> Self {
        Self {
            enabled: true,
            http_path: uip_gateway::LOCAL_DEFAULT_HTTP_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImWebhookSection {
    pub enabled: bool,
    pub url: Option<String>,
    pub auth_header: Option<String>,
    pub timeout_ms: u64,
    pub retry_count: usize,
}

impl Default for ImWebhookSection {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            auth_header: None,
            timeout_ms: 10_000,
            retry_count: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `LogFormat` values.
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilitySection {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

impl GatewayFileConfig {
    /// Loads `path`, or the defaults when no path is given or the file does
    /// not exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|error| ConfigError::Parse {
            message: error.to_string(),
        })
    }

    pub fn with_cli_overrides(mut self, cli: &Cli) -> Self {
        if cli.mock {
            self.backend.mode = BackendMode::Mock;
        }
        if let Some(bind) = cli.bind.as_deref().map(str::trim).filter(|bind| !bind.is_empty()) {
            self.server.bind = bind.to_string();
        }
        if let Some(level) = cli.log_level.as_deref().map(str::trim).filter(|level| !level.is_empty()) {
            self.observability.log_level = level.to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.backend.endpoint.trim().is_empty() && self.backend.mode != BackendMode::Mock {
            return Err(invalid("backend.endpoint", "must not be empty"));
        }
        for (field, value) in [
            ("server.shutdown_timeout_ms", self.server.shutdown_timeout_ms),
            ("gateway.dispatch_timeout_ms", self.gateway.dispatch_timeout_ms),
            ("backend.request_timeout_ms", self.backend.request_timeout_ms),
            ("backend.reply_timeout_ms", self.backend.reply_timeout_ms),
            ("session.ttl_seconds", self.session.ttl_seconds),
            ("session.cleanup_interval_seconds", self.session.cleanup_interval_seconds),
            ("session.correlation_ttl_seconds", self.session.correlation_ttl_seconds),
            ("im_webhook.timeout_ms", self.im_webhook.timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }
        if self.backend.reply_timeout_ms >= self.gateway.dispatch_timeout_ms {
            return Err(invalid(
                "backend.reply_timeout_ms",
                format!(
                    "must be lower than gateway.dispatch_timeout_ms ({})",
                    self.gateway.dispatch_timeout_ms
                ),
            ));
        }
        if self.gateway.worker_count == 0 {
            return Err(invalid("gateway.worker_count", "must be greater than 0"));
        }
        if self.gateway.queue_capacity == 0 {
            return Err(invalid("gateway.queue_capacity", "must be greater than 0"));
        }
        for (field, path) in [
            ("server.outbound_path", &self.server.outbound_path),
            ("server.legacy_callback_path", &self.server.legacy_callback_path),
            ("server.transport_path", &self.server.transport_path),
            ("adapters.local.http_path", &self.adapters.local.http_path),
        ] {
            if !path.starts_with('/') || path.len() < 2 {
                return Err(invalid(field, "must be an absolute path such as /api/v1/x"));
            }
        }
        if self.im_webhook.enabled
            && self
                .im_webhook
                .url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
        {
            return Err(invalid("im_webhook.url", "is required when im_webhook is enabled"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .trim()
            .parse::<SocketAddr>()
            .map_err(|error| invalid("server.bind", format!("'{}': {error}", self.server.bind)))
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            worker_count: self.gateway.worker_count,
            queue_capacity: self.gateway.queue_capacity,
            dispatch_timeout: Duration::from_millis(self.gateway.dispatch_timeout_ms),
            session_ttl: Duration::from_secs(self.session.ttl_seconds),
            cleanup_interval: Duration::from_secs(self.session.cleanup_interval_seconds),
            shutdown_timeout: Duration::from_millis(self.server.shutdown_timeout_ms),
        }
    }

    pub fn universal_im_config(&self) -> UniversalImConfig {
        let section = &self.backend.universal_im;
        UniversalImConfig {
            account_id: section.account_id.clone(),
            webhook_path: section.webhook_path.clone(),
            secret: section.secret.clone(),
            transport: section.transport,
            regime: section.regime,
            request_timeout_ms: self.backend.request_timeout_ms,
            reply_timeout_ms: self.backend.reply_timeout_ms,
            max_retries: self.backend.max_retries,
            fallback_model: section.fallback_model.clone(),
            correlation_ttl: Duration::from_secs(self.session.correlation_ttl_seconds),
            ..UniversalImConfig::new(self.backend.endpoint.clone())
        }
    }

    pub fn chat_config(&self) -> ChatClientConfig {
        ChatClientConfig {
            endpoint: self.backend.endpoint.clone(),
            request_timeout_ms: self.backend.request_timeout_ms,
            max_retries: self.backend.max_retries,
        }
    }

    pub fn im_webhook_config(&self) -> Option<ImWebhookConfig> {
        if !self.im_webhook.enabled {
            return None;
        }
        let url = self.im_webhook.url.clone()?;
        Some(ImWebhookConfig {
            url,
            auth_header: self.im_webhook.auth_header.clone(),
            timeout_ms: self.im_webhook.timeout_ms,
            retry_count: self.im_webhook.retry_count,
        })
    }

    pub fn server_config(&self) -> GatewayServerConfig {
        let universal_im = (self.backend.mode == BackendMode::UniversalIm)
            .then_some(&self.backend.universal_im);
        GatewayServerConfig {
            bind: self.server.bind.clone(),
            outbound_path: self.server.outbound_path.clone(),
            legacy_callback_path: self.server.legacy_callback_path.clone(),
            transport_path: self.server.transport_path.clone(),
            outbound_auth_header: self.backend.universal_im.outbound_auth_header.clone(),
            backend_mode: self.backend.mode,
            backend_endpoint: self.backend.endpoint.clone(),
            account_id: universal_im.map(|section| section.account_id.clone()),
            backend_transport: universal_im.map(|section| section.transport.as_str().to_string()),
        }
    }
}
