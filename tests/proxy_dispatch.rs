// Dispatch engine against real backend listeners on ephemeral ports.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::body::Body;
use http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use myelin::{
    EmbeddedPages, GatewayHandler, HttpClientAdapter, MetricsRegistry, Pipeline, ProxyDispatcher,
    StatusOverrides, UpstreamRouter,
    config::models::AppConfig,
    core::Scheme,
    ports::PageRenderer,
    server,
    utils::{GracefulShutdown, ShutdownReason},
};
use tokio::time::sleep;

/// Minimal backend echoing its name and the path it saw.
async fn spawn_backend(name: &'static str) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        use axum::{Router, extract::Request, routing::any};
        let app = Router::new().route(
            "/{*path}",
            any(move |req: Request| async move { format!("{name}:{}", req.uri().path()) }),
        );
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("backend server error: {e}");
        }
    });
    // Give the backend a beat to start accepting.
    sleep(Duration::from_millis(50)).await;
    addr
}

/// A port that is guaranteed dead: bound once, then released.
async fn dead_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn build_handler(
    config: AppConfig,
    shutdown: &GracefulShutdown,
) -> (Arc<GatewayHandler>, Arc<MetricsRegistry>) {
    let config = Arc::new(config);
    let metrics = Arc::new(MetricsRegistry::new());
    let pages: Arc<dyn PageRenderer> = Arc::new(EmbeddedPages::new());
    let pipeline = Pipeline::from_config(&config, None, pages.clone(), shutdown.shutdown_token())
        .expect("pipeline builds");
    let router =
        Arc::new(UpstreamRouter::from_specs(&config.proxy.upstreams).expect("router builds"));
    let client = Arc::new(HttpClientAdapter::new().expect("client builds"));
    let dispatcher = ProxyDispatcher::new(router, client, metrics.clone());
    let overrides = StatusOverrides::from_config(&config.proxy.override_status);
    let handler = Arc::new(GatewayHandler::new(
        pipeline,
        dispatcher,
        overrides,
        pages,
        metrics.clone(),
        None,
    ));
    (handler, metrics)
}

fn quiet_config(upstreams: Vec<String>) -> AppConfig {
    let mut config = AppConfig::default();
    config.http_server.rate_limit = 0.0;
    config.http_server.csrf = false;
    config.proxy.upstreams = upstreams;
    config
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

async fn body_text(response: http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn round_robin_cycles_through_both_targets() {
    let a = spawn_backend("alpha").await;
    let b = spawn_backend("beta").await;

    let spec = format!("http://127.0.0.1:{}/api?server=127.0.0.1:{}", a.port(), b.port());
    let shutdown = GracefulShutdown::new();
    let (handler, _) = build_handler(quiet_config(vec![spec]), &shutdown);

    let mut bodies = Vec::new();
    for _ in 0..4 {
        let response = handler
            .handle_request(get("/api/users"), None, Scheme::Http)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        bodies.push(body_text(response).await);
    }

    assert_eq!(
        bodies,
        vec![
            "alpha:/api/users",
            "beta:/api/users",
            "alpha:/api/users",
            "beta:/api/users"
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rewrite_is_applied_before_forwarding() {
    let a = spawn_backend("alpha").await;

    let spec = format!("http://127.0.0.1:{}/app?rewrite=/app:/internal", a.port());
    let shutdown = GracefulShutdown::new();
    let (handler, _) = build_handler(quiet_config(vec![spec]), &shutdown);

    let response = handler
        .handle_request(get("/app/dashboard"), None, Scheme::Http)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "alpha:/internal/dashboard");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dead_target_fails_over_without_client_visible_error() {
    let dead = dead_port().await;
    let live = spawn_backend("live").await;

    let spec = format!("http://127.0.0.1:{dead}/api?server=127.0.0.1:{}", live.port());
    let shutdown = GracefulShutdown::new();
    let (handler, metrics) = build_handler(quiet_config(vec![spec]), &shutdown);

    // First selection lands on the dead target and must fail over silently.
    let response = handler
        .handle_request(get("/api/orders"), None, Scheme::Http)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "live:/api/orders");

    let scrape = metrics.export_prometheus();
    assert!(scrape.contains("myelin_upstream_retries_total 1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_budget_surfaces_502_and_override_page() {
    let dead_a = dead_port().await;
    let dead_b = dead_port().await;

    // No override: plain 502.
    let spec = format!("http://127.0.0.1:{dead_a}/api?server=127.0.0.1:{dead_b}");
    let shutdown = GracefulShutdown::new();
    let (handler, _) = build_handler(quiet_config(vec![spec.clone()]), &shutdown);
    let response = handler
        .handle_request(get("/api/x"), None, Scheme::Http)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // With an override page the client sees the 503 HTML substitute.
    let mut config = quiet_config(vec![spec]);
    config
        .proxy
        .override_status
        .insert("502".to_string(), "error.html".to_string());
    let (handler, _) = build_handler(config, &shutdown);
    let response = handler
        .handle_request(get("/api/x"), None, Scheme::Http)
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn upstream_error_statuses_pass_through_unmodified() {
    // Backend that always answers 418 with a body.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        use axum::{Router, http::StatusCode, routing::any};
        let app = Router::new().route(
            "/{*path}",
            any(|| async { (StatusCode::IM_A_TEAPOT, "teapot says no") }),
        );
        let _ = axum::serve(listener, app).await;
    });
    sleep(Duration::from_millis(50)).await;

    let spec = format!("http://127.0.0.1:{}/api", addr.port());
    let mut config = quiet_config(vec![spec]);
    // An override for 502 must not touch a committed upstream response.
    config
        .proxy
        .override_status
        .insert("502".to_string(), "error.html".to_string());

    let shutdown = GracefulShutdown::new();
    let (handler, _) = build_handler(config, &shutdown);
    let response = handler
        .handle_request(get("/api/tea"), None, Scheme::Http)
        .await;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(body_text(response).await, "teapot says no");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn listeners_drain_and_stop_on_shutdown() {
    let mut config = quiet_config(Vec::new());
    config.http_server.listen = "127.0.0.1:0".to_string();
    config.http_server.listen_tls = String::new();
    config.http_server.shutdown_timeout = 2;

    let shutdown = Arc::new(GracefulShutdown::with_deadline(Duration::from_secs(2)));
    let (handler, metrics) = build_handler(config.clone(), &shutdown);

    let run = tokio::spawn(server::run(
        Arc::new(config),
        handler,
        metrics,
        shutdown.clone(),
    ));

    sleep(Duration::from_millis(200)).await;
    shutdown
        .trigger_shutdown(ShutdownReason::Graceful)
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("server::run must return after the shutdown signal")
        .expect("listener task must not panic");
    assert!(result.is_ok());
}
