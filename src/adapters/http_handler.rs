use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body as AxumBody,
    extract::{ConnectInfo, Path, Request, State, rejection::JsonRejection},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::{
    adapters::{
        forwarder::{FallbackRoute, ForwarderPool},
        middleware::{
            cors_middleware, rate_limit_middleware, request_id_middleware,
            request_timing_middleware, security_headers_middleware,
        },
    },
    config::models::GatewayConfig,
    core::{
        dispatcher::Dispatcher, module::ModuleStatus, rate_limiter::ClientRateLimiter,
        registry::ModuleRegistry,
    },
    error::GatewayError,
    ports::http_client::HttpClient,
};

/// HTTP surface of the gateway: health, module management and the dynamic
/// proxy for everything else under the API prefix.
pub struct HttpHandler {
    registry: Arc<ModuleRegistry>,
    dispatcher: Dispatcher,
    forwarders: ForwarderPool,
    fallbacks: Vec<FallbackRoute>,
    api_prefix: String,
    rate_limiter: Option<ClientRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    manifest: Option<Value>,
    #[serde(default)]
    url: Option<String>,
}

impl HttpHandler {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        dispatcher: Dispatcher,
        forwarders: ForwarderPool,
        api_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            forwarders,
            fallbacks: Vec::new(),
            api_prefix: api_prefix.into(),
            rate_limiter: None,
        }
    }

    /// Wire a handler from configuration, sharing `client` between module
    /// forwarders and fallback routes.
    pub fn from_config(
        config: &GatewayConfig,
        registry: Arc<ModuleRegistry>,
        client: Arc<dyn HttpClient>,
    ) -> eyre::Result<Self> {
        let fallbacks = config
            .fallback_routes
            .iter()
            .map(|route| FallbackRoute::from_config(route, Arc::clone(&client)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| eyre::eyre!("Invalid fallback route: {e:?}"))?;

        let rate_limiter = config
            .rate_limit
            .as_ref()
            .map(ClientRateLimiter::new)
            .transpose()
            .map_err(|e| eyre::eyre!("Invalid rate limit: {e}"))?;

        let mut handler = Self::new(
            registry,
            Dispatcher::new(config.registry.match_policy),
            ForwarderPool::new(client, config.proxy.change_origin),
            config.api_prefix.clone(),
        )
        .with_fallback_routes(fallbacks);
        handler.rate_limiter = rate_limiter;
        Ok(handler)
    }

    pub fn with_fallback_routes(mut self, fallbacks: Vec<FallbackRoute>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: ClientRateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn rate_limiter(&self) -> Option<&ClientRateLimiter> {
        self.rate_limiter.as_ref()
    }

    /// Build the axum router with every middleware layer attached.
    pub fn router(self: Arc<Self>) -> Router {
        let prefix = self.api_prefix.clone();
        let rate_limiter = self.rate_limiter.clone();

        let mut router = Router::new()
            .route("/health", get(health))
            .route(&format!("{prefix}/modules/register"), post(register_module))
            .route(&format!("{prefix}/modules"), get(list_modules))
            .route(&format!("{prefix}/modules/{{id}}/install"), post(install_module))
            .route(
                &format!("{prefix}/modules/{{id}}/uninstall"),
                post(uninstall_module),
            )
            .fallback(proxy_request)
            .method_not_allowed_fallback(proxy_request)
            .with_state(self);

        if let Some(limiter) = rate_limiter {
            router = router.layer(middleware::from_fn_with_state(
                limiter,
                rate_limit_middleware,
            ));
        }

        router
            .layer(middleware::from_fn(request_timing_middleware))
            .layer(middleware::from_fn(security_headers_middleware))
            .layer(middleware::from_fn(cors_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(request_id_middleware))
    }

    /// Remove the API prefix; `None` when `path` lies outside it.
    fn strip_api_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.api_prefix.is_empty() {
            return Some(path);
        }
        let rest = path.strip_prefix(self.api_prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    async fn proxy(&self, req: Request<AxumBody>) -> Result<Response, GatewayError> {
        let path = req.uri().path().to_string();
        let stripped = self
            .strip_api_prefix(&path)
            .ok_or_else(GatewayError::route_not_found)?;
        let client_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let snapshot = self.registry.snapshot();
        if let Some(matched) = self.dispatcher.dispatch(&snapshot, stripped, req.method()) {
            tracing::debug!(
                "Matched route {} of module {}, proxying to {}",
                matched.rule().path,
                matched.module.name,
                matched.module.url
            );
            let forwarder = self
                .forwarders
                .forwarder_for(&snapshot, &matched.module.url)?;
            return forwarder.forward(req, stripped, client_addr).await;
        }

        if let Some(fallback) = self.fallbacks.iter().find(|f| f.matches(stripped)) {
            tracing::debug!(
                "No module claims {}, using fallback route {} -> {}",
                path,
                fallback.prefix,
                fallback.forwarder.target()
            );
            let upstream_path = if fallback.strip_api_prefix {
                stripped
            } else {
                path.as_str()
            };
            return fallback
                .forwarder
                .forward(req, upstream_path, client_addr)
                .await;
        }

        tracing::debug!("No module or fallback route for {} {}", req.method(), path);
        Err(GatewayError::route_not_found())
    }
}

async fn health(State(handler): State<Arc<HttpHandler>>) -> Json<Value> {
    let snapshot = handler.registry.snapshot();
    Json(json!({
        "status": "API Gateway is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "modules": snapshot.len(),
        "snapshot_version": snapshot.version(),
    }))
}

async fn register_module(
    State(handler): State<Arc<HttpHandler>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!("Rejected registration body: {}", rejection.body_text());
        GatewayError::Validation("Manifest and URL are required".to_string())
    })?;

    let manifest = request.manifest.filter(|m| !m.is_null());
    let url = request.url.filter(|u| !u.trim().is_empty());
    let (Some(manifest), Some(url)) = (manifest, url) else {
        return Err(GatewayError::Validation(
            "Manifest and URL are required".to_string(),
        ));
    };

    let module = handler
        .registry
        .register_module(manifest, &url)
        .await
        .map_err(|e| GatewayError::from_registry(e, "Registration failed"))?;

    Ok(Json(json!({ "status": "registered", "module": module })))
}

async fn list_modules(
    State(handler): State<Arc<HttpHandler>>,
) -> Result<Json<Value>, GatewayError> {
    let modules = handler
        .registry
        .list_all()
        .await
        .map_err(|e| GatewayError::from_registry(e, "Failed to list modules"))?;

    Ok(Json(json!({
        "success": true,
        "count": modules.len(),
        "data": modules,
    })))
}

async fn install_module(
    State(handler): State<Arc<HttpHandler>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    change_status(&handler, &id, ModuleStatus::Active, "installed").await
}

async fn uninstall_module(
    State(handler): State<Arc<HttpHandler>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    change_status(&handler, &id, ModuleStatus::Inactive, "uninstalled").await
}

async fn change_status(
    handler: &HttpHandler,
    id: &str,
    status: ModuleStatus,
    verb: &str,
) -> Result<Json<Value>, GatewayError> {
    let module = handler
        .registry
        .set_status(id, status)
        .await
        .map_err(|e| GatewayError::from_registry(e, "Failed to update module status"))?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Module {id} {verb} successfully"),
        "data": module,
    })))
}

async fn proxy_request(State(handler): State<Arc<HttpHandler>>, req: Request) -> Response {
    match handler.proxy(req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}
