//! Outbound HTTP port used to reach module backends and fallback targets.
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// The backend could not be reached or dropped the connection.
    #[error("Connection error: {0}")]
    Unreachable(String),

    /// No response head arrived within the configured upstream timeout.
    #[error("No response within {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Relay `req` to the backend named by its absolute URI.
    ///
    /// The response body is streamed back, never buffered. Dropping the
    /// returned future abandons the backend call.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
