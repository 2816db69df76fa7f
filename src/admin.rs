//! Admin/metrics endpoint, gated by a static API key.
//!
//! Runs on its own listener when `listen_sys` differs from the main listen
//! address; otherwise the scrape path is mounted on the main pipeline. The
//! key arrives as an `?api-key=` query parameter or in the `Authorization`
//! header (raw or `Bearer`), and is compared in constant time.
use std::sync::Arc;

use axum::{Router, body::Body, extract::State, routing::get};
use http::{HeaderMap, Request, Response, StatusCode, header};
use subtle::ConstantTimeEq as _;
use tower_http::trace::TraceLayer;

use crate::{config::consts::PATH_SYS_METRICS_API, metrics::MetricsRegistry};

pub struct AdminState {
    pub api_key: String,
    pub metrics: Arc<MetricsRegistry>,
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Key lookup: `query:api-key` then `header:Authorization`. An empty
/// configured key never authorizes (validation rejects that setup anyway).
pub fn authorized(headers: &HeaderMap, query: Option<&str>, api_key: &str) -> bool {
    if api_key.is_empty() {
        return false;
    }

    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "api-key" && constant_time_eq(&value, api_key) {
                return true;
            }
        }
    }

    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        let candidate = value.strip_prefix("Bearer ").unwrap_or(value);
        if constant_time_eq(candidate, api_key) {
            return true;
        }
    }

    false
}

/// Render the metrics scrape response (shared by the dedicated listener and
/// the mounted route).
pub fn handle_metrics_request(
    headers: &HeaderMap,
    query: Option<&str>,
    api_key: &str,
    metrics: &MetricsRegistry,
) -> Response<Body> {
    if !authorized(headers, query, api_key) {
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(Body::from("Unauthorized"))
            .unwrap_or_else(|_| Response::new(Body::empty()));
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )
        .body(Body::from(metrics.export_prometheus()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

async fn metrics_handler(
    State(state): State<Arc<AdminState>>,
    req: Request<Body>,
) -> Response<Body> {
    handle_metrics_request(
        req.headers(),
        req.uri().query(),
        &state.api_key,
        &state.metrics,
    )
}

async fn status_handler(
    State(state): State<Arc<AdminState>>,
    req: Request<Body>,
) -> Response<Body> {
    if !authorized(req.headers(), req.uri().query(), &state.api_key) {
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(Body::from("Unauthorized"))
            .unwrap_or_else(|_| Response::new(Body::empty()));
    }

    let status = serde_json::json!({
        "service": crate::config::consts::APP_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.metrics.uptime_secs(),
        "requests_total": state.metrics.requests_total(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(status.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Router for the dedicated admin listener.
pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route(PATH_SYS_METRICS_API, get(metrics_handler))
        .route("/sys/api/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
