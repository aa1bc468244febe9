//! HTTP error envelope and request/response bodies shared by handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use uip_protocol::{UipError, UipErrorCode};

/// Protocol error mapped to the `{success:false, error:{...}}` envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: UipError,
}

impl ApiError {
    pub fn new(status: StatusCode, error: UipError) -> Self {
        Self { status, error }
    }

    pub fn bad_request(error: UipError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::bad_request(UipError::protocol(message))
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            UipError::gateway("missing or invalid authorization header"),
        )
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, UipError::gateway(message))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, UipError::not_found(message))
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.error = self.error.with_trace_id(trace_id);
        self
    }
}

impl From<UipError> for ApiError {
    fn from(error: UipError) -> Self {
        let status = match error.code {
            UipErrorCode::ProtocolError => StatusCode::BAD_REQUEST,
            UipErrorCode::NotFound => StatusCode::NOT_FOUND,
            UipErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            UipErrorCode::GatewayError | UipErrorCode::RuntimeError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "success": false,
                "error": self.error,
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundResponse {
    pub ok: bool,
    pub message_id: String,
    pub to: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<uip_protocol::OutboundRouting>,
    pub status: &'static str,
}
