use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `GatewayError` values.
pub enum GatewayError {
    #[error("gateway already started")]
    AlreadyStarted,
    #[error("gateway not started")]
    NotStarted,
    #[error("gateway stopped and cannot be restarted")]
    Stopped,
    #[error("adapter '{0}' is already registered")]
    AdapterAlreadyRegistered(String),
    #[error("adapters must be registered before the gateway starts")]
    RegistrationClosed,
    #[error("adapter '{name}' failed to start: {message}")]
    AdapterStart { name: String, message: String },
    #[error("no adapter factory registered under '{0}'")]
    UnknownAdapterFactory(String),
    #[error("adapter '{adapter}' could not deliver intent: {message}")]
    AdapterSend { adapter: String, message: String },
    #[error("no live connection for session '{0}'")]
    SessionNotConnected(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
