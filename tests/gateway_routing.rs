use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Request},
    http::{Method, StatusCode, header},
    response::Response,
};
use http_body_util::BodyExt;
use modgate::{
    adapters::{
        FallbackRoute, ForwarderPool, HttpClientAdapter, HttpHandler, stores::InMemoryModuleStore,
    },
    config::{FallbackRouteConfig, RateLimitConfig},
    core::{
        dispatcher::{Dispatcher, MatchPolicy},
        rate_limiter::ClientRateLimiter,
        registry::ModuleRegistry,
    },
    ports::http_client::HttpClient,
};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Loopback backend that reports what it received.
async fn spawn_backend(service: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |req: Request| async move {
        Json(json!({
            "service": service,
            "method": req.method().as_str(),
            "path": req.uri().path(),
            "query": req.uri().query(),
        }))
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn http_client() -> Arc<dyn HttpClient> {
    Arc::new(HttpClientAdapter::new(Duration::from_secs(5)).unwrap())
}

struct TestGateway {
    registry: Arc<ModuleRegistry>,
    app: Router,
}

fn gateway_with(policy: MatchPolicy, fallbacks: Vec<FallbackRoute>) -> TestGateway {
    let registry = Arc::new(ModuleRegistry::new(Arc::new(InMemoryModuleStore::new())));
    let handler = HttpHandler::new(
        registry.clone(),
        Dispatcher::new(policy),
        ForwarderPool::new(http_client(), false),
        "/api/v1",
    )
    .with_fallback_routes(fallbacks);
    TestGateway {
        registry,
        app: Arc::new(handler).router(),
    }
}

fn gateway() -> TestGateway {
    gateway_with(MatchPolicy::FirstMatch, Vec::new())
}

impl TestGateway {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn register(&self, name: &str, routes: Value, url: &str) -> Response {
        self.send(
            Method::POST,
            "/api/v1/modules/register",
            Some(json!({
                "manifest": { "name": name, "version": "1.0.0", "routes": routes },
                "url": url,
            })),
        )
        .await
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_register_then_list_and_proxy() {
    let backend = spawn_backend("attendance").await;
    let gw = gateway();

    let response = gw
        .register(
            "attendance",
            json!([{ "path": "/attendance", "method": "ALL" }]),
            &format!("http://{backend}"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "registered");
    assert_eq!(body["module"]["name"], "attendance");

    let response = gw.send(Method::GET, "/api/v1/modules", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["name"], "attendance");
    assert_eq!(body["data"][0]["status"], "active");

    let response = gw
        .send(Method::GET, "/api/v1/attendance/records?class=7B", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "attendance");
    assert_eq!(body["path"], "/attendance/records");
    assert_eq!(body["query"], "class=7B");

    let response = gw.send(Method::GET, "/health", None).await;
    let body = body_json(response).await;
    assert_eq!(body["modules"], 1);
}

#[tokio::test]
async fn test_uninstall_then_install() {
    let backend = spawn_backend("attendance").await;
    let gw = gateway();
    gw.register(
        "attendance",
        json!([{ "path": "/attendance" }]),
        &format!("http://{backend}"),
    )
    .await;

    let response = gw
        .send(Method::POST, "/api/v1/modules/attendance/uninstall", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Module attendance uninstalled successfully");
    assert_eq!(body["data"]["status"], "inactive");

    let response = gw
        .send(Method::GET, "/api/v1/attendance/records", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Route not found");

    // The row is kept and still listed
    let body = body_json(gw.send(Method::GET, "/api/v1/modules", None).await).await;
    assert_eq!(body["count"], 1);

    let response = gw
        .send(Method::POST, "/api/v1/modules/attendance/install", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = gw
        .send(Method::GET, "/api/v1/attendance/records", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_backend_down_is_503_and_refresh_still_works() {
    let down = closed_port().await;
    let gw = gateway();
    gw.register("fees", json!([{ "path": "/fees" }]), &format!("http://{down}"))
        .await;

    let response = gw.send(Method::GET, "/api/v1/fees/invoices", None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Service unavailable");

    let version = gw.registry.snapshot().version();
    let snapshot = gw.registry.refresh().await.unwrap();
    assert_eq!(snapshot.version(), version + 1);
    assert!(gw.registry.get_module("fees").is_some());
}

#[tokio::test]
async fn test_first_match_follows_module_name_order() {
    let accounts = spawn_backend("accounts").await;
    let fees = spawn_backend("fees").await;
    let gw = gateway();
    gw.register(
        "accounts",
        json!([{ "path": "/fees" }]),
        &format!("http://{accounts}"),
    )
    .await;
    gw.register(
        "fees",
        json!([{ "path": "/fees/invoices" }]),
        &format!("http://{fees}"),
    )
    .await;

    let body = body_json(gw.send(Method::GET, "/api/v1/fees/invoices/9", None).await).await;
    assert_eq!(body["service"], "accounts");
}

#[tokio::test]
async fn test_longest_prefix_policy() {
    let accounts = spawn_backend("accounts").await;
    let fees = spawn_backend("fees").await;
    let gw = gateway_with(MatchPolicy::LongestPrefix, Vec::new());
    gw.register(
        "accounts",
        json!([{ "path": "/fees" }]),
        &format!("http://{accounts}"),
    )
    .await;
    gw.register(
        "fees",
        json!([{ "path": "/fees/invoices" }]),
        &format!("http://{fees}"),
    )
    .await;

    let body = body_json(gw.send(Method::GET, "/api/v1/fees/invoices/9", None).await).await;
    assert_eq!(body["service"], "fees");
    let body = body_json(gw.send(Method::GET, "/api/v1/fees/summary", None).await).await;
    assert_eq!(body["service"], "accounts");
}

#[tokio::test]
async fn test_method_specific_route() {
    let backend = spawn_backend("library").await;
    let gw = gateway();
    gw.register(
        "library",
        json!([{ "path": "/library/books", "method": "GET" }]),
        &format!("http://{backend}"),
    )
    .await;

    let response = gw.send(Method::GET, "/api/v1/library/books", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = gw
        .send(Method::POST, "/api/v1/library/books", Some(json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fallback_route_forwards_full_path() {
    let auth = spawn_backend("auth").await;
    let fallback = FallbackRoute::from_config(
        &FallbackRouteConfig {
            prefix: "/auth".to_string(),
            target: format!("http://{auth}"),
            change_origin: true,
            strip_api_prefix: false,
        },
        http_client(),
    )
    .unwrap();
    let gw = gateway_with(MatchPolicy::FirstMatch, vec![fallback]);

    let response = gw
        .send(
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "username": "admin" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "auth");
    assert_eq!(body["method"], "POST");
    assert_eq!(body["path"], "/api/v1/auth/login");
}

#[tokio::test]
async fn test_registered_module_wins_over_fallback() {
    let auth_module = spawn_backend("auth-module").await;
    let auth_legacy = spawn_backend("auth-legacy").await;
    let fallback = FallbackRoute::from_config(
        &FallbackRouteConfig {
            prefix: "/auth".to_string(),
            target: format!("http://{auth_legacy}"),
            change_origin: true,
            strip_api_prefix: false,
        },
        http_client(),
    )
    .unwrap();
    let gw = gateway_with(MatchPolicy::FirstMatch, vec![fallback]);
    gw.register(
        "auth",
        json!([{ "path": "/auth" }]),
        &format!("http://{auth_module}"),
    )
    .await;

    let body = body_json(gw.send(Method::GET, "/api/v1/auth/me", None).await).await;
    assert_eq!(body["service"], "auth-module");
    assert_eq!(body["path"], "/auth/me");
}

#[tokio::test]
async fn test_module_url_change_takes_effect() {
    let old = spawn_backend("transport-v1").await;
    let new = spawn_backend("transport-v2").await;
    let gw = gateway();

    gw.register(
        "transport",
        json!([{ "path": "/transport" }]),
        &format!("http://{old}"),
    )
    .await;
    let body = body_json(gw.send(Method::GET, "/api/v1/transport/routes", None).await).await;
    assert_eq!(body["service"], "transport-v1");

    gw.register(
        "transport",
        json!([{ "path": "/transport" }]),
        &format!("http://{new}"),
    )
    .await;
    let body = body_json(gw.send(Method::GET, "/api/v1/transport/routes", None).await).await;
    assert_eq!(body["service"], "transport-v2");
}

#[tokio::test]
async fn test_rate_limit_applies_per_client() {
    let registry = Arc::new(ModuleRegistry::new(Arc::new(InMemoryModuleStore::new())));
    let limiter = ClientRateLimiter::new(&RateLimitConfig {
        requests: 2,
        period: "1m".to_string(),
        ..RateLimitConfig::default()
    })
    .unwrap();
    let app = Arc::new(
        HttpHandler::new(
            registry,
            Dispatcher::default(),
            ForwarderPool::new(http_client(), false),
            "/api/v1",
        )
        .with_rate_limiter(limiter),
    )
    .router();

    let health_from = |ip: [u8; 4]| {
        let mut req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 40000))));
        app.clone().oneshot(req)
    };

    assert_eq!(health_from([10, 0, 0, 1]).await.unwrap().status(), StatusCode::OK);
    assert_eq!(health_from([10, 0, 0, 1]).await.unwrap().status(), StatusCode::OK);

    let limited = health_from([10, 0, 0, 1]).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(limited).await;
    assert_eq!(body["error"], "Too many requests, please try again later");

    assert_eq!(health_from([10, 0, 0, 2]).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_backend_security_and_cors_headers_are_relayed() {
    let app = Router::new().fallback(|| async {
        (
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "https://school.example"),
                (header::X_FRAME_OPTIONS, "DENY"),
            ],
            "ok",
        )
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let gw = gateway();
    gw.register(
        "attendance",
        json!([{ "path": "/attendance" }]),
        &format!("http://{backend}"),
    )
    .await;

    let response = gw
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/attendance/records")
                .header(header::ORIGIN, "https://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "https://school.example"
    );
    assert_eq!(headers.get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
    // Headers the backend left out are still filled in
    assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");

    // Gateway-generated responses get the permissive defaults
    let response = gw
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "https://portal.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "https://portal.example"
    );
    assert_eq!(
        response.headers().get(header::X_FRAME_OPTIONS).unwrap(),
        "SAMEORIGIN"
    );
}

#[tokio::test]
async fn test_unsupported_method_on_management_path_falls_through() {
    let gw = gateway();
    let response = gw.send(Method::GET, "/api/v1/modules/register", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Route not found");

    let response = gw
        .send(Method::DELETE, "/api/v1/modules/attendance/install", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // A module that claims the path receives it instead
    let backend = spawn_backend("catalog").await;
    gw.register(
        "catalog",
        json!([{ "path": "/modules" }]),
        &format!("http://{backend}"),
    )
    .await;
    let response = gw.send(Method::GET, "/api/v1/modules/register", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "catalog");
    assert_eq!(body["path"], "/modules/register");
}
