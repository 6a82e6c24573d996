//! Reverse proxy forwarding to module backends.
//!
//! A [`Forwarder`] relays one request to a fixed base URL. The
//! [`ForwarderPool`] keeps one forwarder per distinct module URL and swaps in a
//! new generation whenever the registry publishes a newer snapshot.
use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use arc_swap::ArcSwap;
use axum::body::Body as AxumBody;
use hyper::{
    HeaderMap, Request, Response, Uri,
    header::{self, HeaderName, HeaderValue},
};

use crate::{
    config::models::FallbackRouteConfig,
    core::snapshot::RegistrySnapshot,
    error::GatewayError,
    ports::http_client::HttpClient,
};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Relays requests to a single upstream base URL.
pub struct Forwarder {
    target: String,
    authority: HeaderValue,
    change_origin: bool,
    client: Arc<dyn HttpClient>,
}

impl Forwarder {
    /// `target` is an absolute base URL; a trailing slash is ignored.
    pub fn new(
        target: &str,
        change_origin: bool,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, GatewayError> {
        let target = target.trim_end_matches('/').to_string();
        let invalid = |reason: &str| GatewayError::UpstreamUnavailable {
            target: target.clone(),
            reason: reason.to_string(),
        };

        let uri: Uri = target
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| invalid(&e.to_string()))?;
        if uri.scheme().is_none() {
            return Err(invalid("target URL has no scheme"));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| invalid("target URL has no host"))?;
        let authority = HeaderValue::from_str(authority.as_str())
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            target,
            authority,
            change_origin,
            client,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Forward `req` to `{target}{upstream_path}` keeping method, headers,
    /// query string and body. The response streams back unmodified.
    pub async fn forward(
        &self,
        mut req: Request<AxumBody>,
        upstream_path: &str,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>, GatewayError> {
        let upstream_path = if upstream_path.is_empty() {
            "/"
        } else {
            upstream_path
        };
        let upstream_uri = match req.uri().query() {
            Some(query) => format!("{}{}?{}", self.target, upstream_path, query),
            None => format!("{}{}", self.target, upstream_path),
        };
        let upstream_uri: Uri = upstream_uri
            .parse()
            .map_err(|_| GatewayError::Validation("Invalid request path".to_string()))?;

        let inbound_host = req
            .headers()
            .get(header::HOST)
            .cloned()
            .or_else(|| {
                req.uri()
                    .authority()
                    .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            });
        let inbound_proto = req.uri().scheme_str().unwrap_or("http").to_string();

        let headers = req.headers_mut();
        if let Some(addr) = client_addr {
            append_forwarded(headers, X_FORWARDED_FOR, &addr.ip().to_string());
        }
        if let Some(host) = inbound_host.as_ref().and_then(|h| h.to_str().ok()) {
            append_forwarded(headers, X_FORWARDED_HOST, host);
        }
        append_forwarded(headers, X_FORWARDED_PROTO, &inbound_proto);

        if self.change_origin {
            headers.insert(header::HOST, self.authority.clone());
        }

        tracing::debug!(
            "Forwarding {} {} -> {}",
            req.method(),
            req.uri().path(),
            upstream_uri
        );
        *req.uri_mut() = upstream_uri;

        self.client
            .send_request(req)
            .await
            .map_err(|e| GatewayError::upstream(&self.target, e))
    }
}

/// Append `value` to a comma separated forwarding header.
fn append_forwarded(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    let combined = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}, {value}"),
        _ => value.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&combined) {
        headers.insert(name, value);
    }
}

struct PoolGeneration {
    snapshot_version: u64,
    forwarders: HashMap<String, Arc<Forwarder>>,
}

/// Forwarders for every module URL in the current snapshot.
pub struct ForwarderPool {
    client: Arc<dyn HttpClient>,
    change_origin: bool,
    generation: ArcSwap<PoolGeneration>,
}

impl ForwarderPool {
    pub fn new(client: Arc<dyn HttpClient>, change_origin: bool) -> Self {
        Self {
            client,
            change_origin,
            generation: ArcSwap::from_pointee(PoolGeneration {
                snapshot_version: 0,
                forwarders: HashMap::new(),
            }),
        }
    }

    /// Return the forwarder for `url`, rebuilding the pool first if
    /// `snapshot` is newer than the generation it was built from.
    pub fn forwarder_for(
        &self,
        snapshot: &RegistrySnapshot,
        url: &str,
    ) -> Result<Arc<Forwarder>, GatewayError> {
        if self.generation.load().snapshot_version < snapshot.version() {
            self.rebuild(snapshot);
        }

        if let Some(forwarder) = self.generation.load().forwarders.get(url) {
            return Ok(Arc::clone(forwarder));
        }

        // Request still holds an older snapshot than the pool
        Forwarder::new(url, self.change_origin, Arc::clone(&self.client)).map(Arc::new)
    }

    /// Swap in a generation for `snapshot`, reusing forwarders whose URL is
    /// unchanged. Older snapshots never replace a newer generation.
    pub fn rebuild(&self, snapshot: &RegistrySnapshot) {
        self.generation.rcu(|current| {
            if current.snapshot_version >= snapshot.version() {
                return Arc::clone(current);
            }

            let mut forwarders = HashMap::new();
            for module in snapshot.modules() {
                if forwarders.contains_key(&module.url) {
                    continue;
                }
                let forwarder = match current.forwarders.get(&module.url) {
                    Some(existing) => Arc::clone(existing),
                    None => {
                        match Forwarder::new(
                            &module.url,
                            self.change_origin,
                            Arc::clone(&self.client),
                        ) {
                            Ok(forwarder) => Arc::new(forwarder),
                            Err(e) => {
                                tracing::warn!(
                                    "Skipping forwarder for module {}: {}",
                                    module.name,
                                    e
                                );
                                continue;
                            }
                        }
                    }
                };
                forwarders.insert(module.url.clone(), forwarder);
            }

            tracing::debug!(
                "Forwarder pool rebuilt for snapshot {} ({} targets)",
                snapshot.version(),
                forwarders.len()
            );
            Arc::new(PoolGeneration {
                snapshot_version: snapshot.version(),
                forwarders,
            })
        });
    }

    pub fn snapshot_version(&self) -> u64 {
        self.generation.load().snapshot_version
    }

    pub fn len(&self) -> usize {
        self.generation.load().forwarders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A configured upstream for paths no module claims.
pub struct FallbackRoute {
    pub prefix: String,
    pub strip_api_prefix: bool,
    pub forwarder: Arc<Forwarder>,
}

impl FallbackRoute {
    pub fn from_config(
        config: &FallbackRouteConfig,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            prefix: config.prefix.clone(),
            strip_api_prefix: config.strip_api_prefix,
            forwarder: Arc::new(Forwarder::new(
                &config.target,
                config.change_origin,
                client,
            )?),
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}
