// Policy pipeline behavior against a fabricated configuration snapshot.
use std::{net::IpAddr, sync::Arc};

use axum::body::Body;
use http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use myelin::{
    EmbeddedPages, GatewayHandler, HttpClientAdapter, MetricsRegistry, Pipeline, ProxyDispatcher,
    StatusOverrides, UpstreamRouter,
    config::models::AppConfig,
    core::Scheme,
    ports::{GeoResolver, PageRenderer},
    utils::GracefulShutdown,
};

struct TableResolver(Vec<(&'static str, &'static str)>);

impl GeoResolver for TableResolver {
    fn resolve(&self, ip: IpAddr) -> Option<String> {
        let ip = ip.to_string();
        self.0
            .iter()
            .find(|(k, _)| *k == ip)
            .map(|(_, v)| v.to_string())
    }
}

fn build_handler(
    config: AppConfig,
    geo: Option<Arc<dyn GeoResolver>>,
    shutdown: &GracefulShutdown,
) -> Arc<GatewayHandler> {
    let config = Arc::new(config);
    let metrics = Arc::new(MetricsRegistry::new());
    let pages: Arc<dyn PageRenderer> = Arc::new(EmbeddedPages::new());
    let pipeline = Pipeline::from_config(&config, geo, pages.clone(), shutdown.shutdown_token())
        .expect("pipeline builds");
    let router =
        Arc::new(UpstreamRouter::from_specs(&config.proxy.upstreams).expect("router builds"));
    let client = Arc::new(HttpClientAdapter::new().expect("client builds"));
    let dispatcher = ProxyDispatcher::new(router, client, metrics.clone());
    let overrides = StatusOverrides::from_config(&config.proxy.override_status);
    Arc::new(GatewayHandler::new(
        pipeline, dispatcher, overrides, pages, metrics, None,
    ))
}

fn base_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.http_server.rate_limit = 0.0;
    config.http_server.csrf = false;
    config
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn maintenance_gate_hides_everything() {
    let mut config = base_config();
    config.is_maint = true;
    // An upstream is configured, but maintenance must answer first.
    config.proxy.upstreams = vec!["http://127.0.0.1:1/api".to_string()];

    let shutdown = GracefulShutdown::new();
    let handler = build_handler(config, None, &shutdown);

    for (method, path) in [("GET", "/api/x"), ("POST", "/other"), ("GET", "/")] {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = handler.handle_request(req, None, Scheme::Http).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "10");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.starts_with(b"<!DOCTYPE html>"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn geo_gate_allows_and_blocks_by_country() {
    let mut config = base_config();
    config.geo_ip.enabled = true;
    config.geo_ip.allow_country = vec!["us".to_string()];

    let resolver: Arc<dyn GeoResolver> =
        Arc::new(TableResolver(vec![("9.9.9.9", "de"), ("8.8.8.8", "us")]));
    let shutdown = GracefulShutdown::new();
    let handler = build_handler(config, Some(resolver), &shutdown);

    let blocked = handler
        .handle_request(
            get("/page"),
            Some("9.9.9.9:1000".parse().unwrap()),
            Scheme::Http,
        )
        .await;
    assert_eq!(blocked.status(), StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS);

    // Allowed country proceeds past the gate; with no upstream configured the
    // dispatcher answers 404, which proves later stages ran.
    let allowed = handler
        .handle_request(
            get("/page"),
            Some("8.8.8.8:1000".parse().unwrap()),
            Scheme::Http,
        )
        .await;
    assert_eq!(allowed.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limiter_caps_burst_per_client() {
    let mut config = base_config();
    config.http_server.rate_limit = 1.0;
    config.http_server.rate_burst = 2;

    let shutdown = GracefulShutdown::new();
    let handler = build_handler(config, None, &shutdown);
    let client = Some("10.1.1.1:999".parse().unwrap());

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = handler
            .handle_request(get("/missing"), client, Scheme::Http)
            .await;
        statuses.push(response.status());
    }
    assert_eq!(
        statuses,
        vec![
            StatusCode::NOT_FOUND,
            StatusCode::NOT_FOUND,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );

    // Another client is unaffected.
    let other = handler
        .handle_request(
            get("/missing"),
            Some("10.1.1.2:999".parse().unwrap()),
            Scheme::Http,
        )
        .await;
    assert_eq!(other.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn https_redirect_upgrades_plain_requests() {
    let mut config = base_config();
    config.http_server.redirect_https = true;

    let shutdown = GracefulShutdown::new();
    let handler = build_handler(config, None, &shutdown);

    let req = Request::builder()
        .uri("/account?tab=1")
        .header(header::HOST, "example.com")
        .body(Body::empty())
        .unwrap();
    let response = handler.handle_request(req, None, Scheme::Http).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://example.com/account?tab=1"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn header_editor_and_request_id_shape_responses() {
    let mut config = base_config();
    config.http_server.request_id = true;
    config.http_server.headers_add = vec!["X-Edge: myelin".to_string()];

    let shutdown = GracefulShutdown::new();
    let handler = build_handler(config, None, &shutdown);

    let response = handler.handle_request(get("/nope"), None, Scheme::Http).await;
    assert_eq!(response.headers()["X-Edge"], "myelin");
    let request_id = response.headers()["X-Request-ID"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn body_limit_rejects_oversized_uploads() {
    let mut config = base_config();
    config.http_server.body_limit = "1K".to_string();

    let shutdown = GracefulShutdown::new();
    let handler = build_handler(config, None, &shutdown);

    let req = Request::builder()
        .method("POST")
        .uri("/upload")
        .body(Body::from(vec![7u8; 4096]))
        .unwrap();
    let response = handler.handle_request(req, None, Scheme::Http).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_endpoint_answers_after_policies() {
    let config = base_config();
    let shutdown = GracefulShutdown::new();
    let handler = build_handler(config, None, &shutdown);

    let response = handler
        .handle_request(get("/proxy/api/ping"), None, Scheme::Http)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"pong");
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_get_is_idempotent() {
    let config = base_config();
    let shutdown = GracefulShutdown::new();
    let handler = build_handler(config, None, &shutdown);

    let first = handler
        .handle_request(get("/missing"), None, Scheme::Http)
        .await;
    let second = handler
        .handle_request(get("/missing"), None, Scheme::Http)
        .await;

    assert_eq!(first.status(), second.status());
    let first_body = first.into_body().collect().await.unwrap().to_bytes();
    let second_body = second.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(first_body, second_body);
}

#[tokio::test(flavor = "multi_thread")]
async fn admin_router_gates_metrics_by_key() {
    use tower::ServiceExt;

    let metrics = Arc::new(MetricsRegistry::new());
    let state = Arc::new(myelin::admin::AdminState {
        api_key: "sekrit".to_string(),
        metrics,
    });
    let router = myelin::admin::router(state);

    let denied = router
        .clone()
        .oneshot(get("/sys/api/metrics"))
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = router
        .clone()
        .oneshot(get("/sys/api/metrics?api-key=sekrit"))
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    let body = allowed.into_body().collect().await.unwrap().to_bytes();
    let text = std::str::from_utf8(&body).unwrap();
    assert!(text.contains("myelin_uptime_seconds"));

    let bearer = router
        .oneshot(
            Request::builder()
                .uri("/sys/api/metrics")
                .header(header::AUTHORIZATION, "Bearer sekrit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bearer.status(), StatusCode::OK);
}
