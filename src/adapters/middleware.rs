//! Axum middleware attached to the gateway router.
//!
//! Security headers, CORS, request timing and request IDs are stateless; the
//! rate limiter is the only layer carrying shared state.
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::core::rate_limiter::ClientRateLimiter;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Log start/end of a request including latency.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    tracing::debug!("Started processing {} {} {:?}", method, uri, version);

    let response = next.run(req).await;
    let duration = start.elapsed();

    tracing::info!(
        "Completed {} {} {:?} - {} in {:?}",
        method,
        uri,
        version,
        response.status(),
        duration
    );

    response
}

/// Add common security hardening headers the upstream did not set itself.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    set_default(headers, header::X_CONTENT_TYPE_OPTIONS, "nosniff");
    set_default(headers, header::X_FRAME_OPTIONS, "SAMEORIGIN");
    set_default(headers, header::X_XSS_PROTECTION, "0");
    set_default(headers, header::REFERRER_POLICY, "no-referrer");
    set_default(headers, header::X_DNS_PREFETCH_CONTROL, "off");
    set_default(
        headers,
        header::STRICT_TRANSPORT_SECURITY,
        "max-age=15552000; includeSubDomains",
    );

    response
}

/// Permissive CORS: any origin, with preflight requests answered directly.
/// A module that sends its own CORS headers keeps them.
pub async fn cors_middleware(req: Request, next: Next) -> Response {
    let origin = req.headers().get(header::ORIGIN).cloned();
    let is_preflight = req.method() == Method::OPTIONS
        && req
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = if is_preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    let headers = response.headers_mut();

    headers
        .entry(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .or_insert_with(|| origin.unwrap_or_else(|| HeaderValue::from_static("*")));
    set_default(
        headers,
        header::ACCESS_CONTROL_ALLOW_METHODS,
        "GET, HEAD, PUT, PATCH, POST, DELETE, OPTIONS",
    );
    set_default(
        headers,
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        "Content-Type, Authorization, X-Requested-With, X-Request-ID",
    );
    set_default(headers, header::ACCESS_CONTROL_MAX_AGE, "86400");

    response
}

fn set_default(headers: &mut HeaderMap, name: HeaderName, value: &'static str) {
    headers
        .entry(name)
        .or_insert_with(|| HeaderValue::from_static(value));
}

/// Tag the request with an ID (reusing a valid inbound `X-Request-ID`),
/// forward it upstream and echo it on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let span = tracing::info_span!("request", request_id = %request_id);
    let mut response = next.run(req).instrument(span).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Reject clients that exceeded their quota before any routing happens.
pub async fn rate_limit_middleware(
    State(limiter): State<ClientRateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match limiter.check(&req) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}
