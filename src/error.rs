//! Error taxonomy for the relay and its HTTP mapping.

use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::metrics::REJECTIONS_TOTAL;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Shared secret missing or wrong.
    #[error("unauthorized")]
    Unauthorized,

    /// A required request field is missing or malformed.
    #[error("bad request: {0}")]
    Validation(String),

    #[error("rate limit exceeded for key {key}")]
    RateLimited { key: String },

    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    /// Downstream answered with a non-success status or an unusable body.
    #[error("downstream {operation} failed with status {status}")]
    Downstream { operation: &'static str, status: u16 },

    /// Downstream call could not complete (connect failure, timeout).
    #[error("downstream {operation} could not complete: {message}")]
    Network {
        operation: &'static str,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Downstream { .. } | Self::Network { .. } | Self::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Validation(_) => "validation",
            Self::RateLimited { .. } => "rate_limited",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Downstream { .. } => "downstream",
            Self::Network { .. } => "network",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<BytesRejection> for GatewayError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge
        } else {
            Self::Validation(rejection.body_text())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON body: {e}"))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        REJECTIONS_TOTAL.with_label_values(&[self.reason()]).inc();

        let body = match &self {
            Self::Unauthorized => "Unauthorized".to_string(),
            Self::Validation(message) => format!("Bad Request: {message}"),
            Self::RateLimited { .. } => "Too Many Requests".to_string(),
            Self::PayloadTooLarge => "Payload Too Large".to_string(),
            Self::Downstream { operation, .. } | Self::Network { operation, .. } => {
                format!("Error forwarding {operation} request.")
            }
            Self::Configuration(_) => "Internal Server Error".to_string(),
        };

        (self.status(), body).into_response()
    }
}
