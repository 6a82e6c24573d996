use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// HTTP client adapter using Hyper with Rustls.
///
/// Responsibilities:
/// * Forces request version to HTTP/1.1 towards module backends
/// * Bounds the time to response headers; the body then streams unbounded
/// * Converts between Hyper body and Axum body types
///
/// One adapter is shared by every forwarder; the underlying hyper client
/// keeps its own per-host connection pool.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    timeout: Duration,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter with the given response timeout.
    pub fn new(response_timeout: Duration) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::info!(
            "Created upstream HTTP client (response timeout {}s)",
            response_timeout.as_secs()
        );
        Ok(Self {
            client,
            timeout: response_timeout,
        })
    }

    pub fn response_timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        let Some(authority) = req.uri().authority().cloned() else {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        };

        let backend_identifier = format!(
            "{}://{}",
            req.uri().scheme_str().unwrap_or("http"),
            authority
        );

        let span = tracing::info_span!(
            "backend_request",
            backend.url = %backend_identifier,
            http.method = %req.method(),
            http.path = %req.uri().path(),
            http.status_code = tracing::field::Empty,
        );

        let client = self.client.clone();
        let response_timeout = self.timeout;

        async move {
            let (mut parts, axum_body) = req.into_parts();
            parts.version = Version::HTTP_11;

            tracing::debug!("Sending request: {} {}", parts.method, parts.uri);
            tracing::trace!("Outgoing request headers: {:?}", parts.headers);

            let outgoing_request = Request::from_parts(parts, axum_body);
            let method_for_error_log = outgoing_request.method().clone();
            let uri_for_error_log = outgoing_request.uri().clone();

            match timeout(response_timeout, client.request(outgoing_request)).await {
                Ok(Ok(response)) => {
                    tracing::Span::current().record("http.status_code", response.status().as_u16());

                    let (mut parts, hyper_body) = response.into_parts();

                    // The body is re-framed by the downstream server.
                    parts.headers.remove(header::TRANSFER_ENCODING);

                    Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
                }
                Ok(Err(e)) => {
                    tracing::Span::current().record("http.status_code", 599u16);
                    tracing::warn!(
                        "Error making request to backend {} ({} {}): {}",
                        backend_identifier,
                        method_for_error_log,
                        uri_for_error_log,
                        e
                    );

                    Err(HttpClientError::Unreachable(format!(
                        "Request to {method_for_error_log} {uri_for_error_log} failed: {e}"
                    )))
                }
                Err(_) => {
                    tracing::Span::current().record("http.status_code", 504u16);
                    tracing::warn!(
                        "Backend {} did not answer within {}s",
                        backend_identifier,
                        response_timeout.as_secs()
                    );
                    Err(HttpClientError::Timeout(response_timeout))
                }
            }
        }
        .instrument(span)
        .await
    }
}
