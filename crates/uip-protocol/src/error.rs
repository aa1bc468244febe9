//! Structured protocol error envelope returned at adapter boundaries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Enumerates supported `UipErrorCode` values.
pub enum UipErrorCode {
    ProtocolError,
    GatewayError,
    RuntimeError,
    Timeout,
    NotFound,
}

impl UipErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::GatewayError => "GATEWAY_ERROR",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::NotFound => "NOT_FOUND",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
/// Protocol-level error carried back to a front-end caller.
pub struct UipError {
    pub code: UipErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl UipError {
    pub fn new(code: UipErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: BTreeMap::new(),
            trace_id: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(UipErrorCode::ProtocolError, message)
    }

    pub fn gateway(message: impl Into<String>) -> Self {
        Self::new(UipErrorCode::GatewayError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(UipErrorCode::NotFound, message)
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        if !trace_id.trim().is_empty() {
            self.trace_id = Some(trace_id);
        }
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}
