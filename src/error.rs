//! HTTP-facing error type.
//!
//! Every handler failure is rendered as `{"success": false, "error": <message>}`.
//! Store failures keep their detail in the logs; clients only see a generic
//! message.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{core::registry::RegistryError, ports::http_client::HttpClientError};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Service unavailable")]
    UpstreamUnavailable { target: String, reason: String },

    #[error("{context}")]
    Store { context: &'static str, detail: String },

    #[error("{0}")]
    RateLimited(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn route_not_found() -> Self {
        GatewayError::NotFound("Route not found".to_string())
    }

    /// Map a registry failure, using `context` as the client message for
    /// store errors.
    pub fn from_registry(err: RegistryError, context: &'static str) -> Self {
        match err {
            RegistryError::Validation(e) => GatewayError::Validation(e.to_string()),
            RegistryError::NotFound(name) => {
                GatewayError::NotFound(format!("Module {name} not found"))
            }
            RegistryError::Store(e) => GatewayError::Store {
                context,
                detail: e.to_string(),
            },
        }
    }

    pub fn upstream(target: impl Into<String>, err: HttpClientError) -> Self {
        GatewayError::UpstreamUnavailable {
            target: target.into(),
            reason: err.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            GatewayError::Store { context, detail } => {
                tracing::error!("{}: {}", context, detail);
            }
            GatewayError::UpstreamUnavailable { target, reason } => {
                tracing::warn!("Upstream {} unavailable: {}", target, reason);
            }
            _ => {}
        }

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}
