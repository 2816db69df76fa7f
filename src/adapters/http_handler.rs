//! Top-level request entry point: pipeline, built-ins, proxy, overrides.
use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use axum::body::Body;
use futures_util::FutureExt;
use http::{Method, Request, Response, StatusCode};

use crate::{
    adapters::proxy::ProxyDispatcher,
    admin,
    config::consts::{PATH_PROXY_PING_API, PATH_SYS_METRICS_API},
    core::{
        RequestContext, Scheme, StatusOverrides,
        pipeline::{Pipeline, StageFlow, internal_error_response},
    },
    metrics::MetricsRegistry,
    ports::PageRenderer,
};

/// Present when the admin scrape path shares the main listener.
pub struct SysMount {
    pub api_key: String,
}

/// Drives one request through the policy pipeline, answers built-in
/// endpoints, dispatches the rest to upstreams, and applies status overrides
/// to locally generated terminal errors. One instance serves all listeners.
pub struct GatewayHandler {
    pipeline: Pipeline,
    dispatcher: ProxyDispatcher,
    overrides: StatusOverrides,
    pages: Arc<dyn PageRenderer>,
    metrics: Arc<MetricsRegistry>,
    sys_mount: Option<SysMount>,
}

impl GatewayHandler {
    pub fn new(
        pipeline: Pipeline,
        dispatcher: ProxyDispatcher,
        overrides: StatusOverrides,
        pages: Arc<dyn PageRenderer>,
        metrics: Arc<MetricsRegistry>,
        sys_mount: Option<SysMount>,
    ) -> Self {
        Self {
            pipeline,
            dispatcher,
            overrides,
            pages,
            metrics,
            sys_mount,
        }
    }

    /// Infallible entry point used by the listeners. Panics anywhere in the
    /// request path are contained here and become a generic 500.
    pub async fn handle_request(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
        scheme: Scheme,
    ) -> Response<Body> {
        self.metrics.record_request_start();

        let response = match AssertUnwindSafe(self.handle_inner(req, client_addr, scheme))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(_) => {
                tracing::error!("request handling panicked outside the stage chain");
                internal_error_response()
            }
        };

        self.metrics.record_response(response.status().as_u16());
        response
    }

    async fn handle_inner(
        &self,
        mut req: Request<Body>,
        client_addr: Option<SocketAddr>,
        scheme: Scheme,
    ) -> Response<Body> {
        let mut ctx = RequestContext::new(client_addr, scheme);
        let original_uri = req.uri().clone();

        let mut response = match self.pipeline.run(&mut req, &mut ctx).await {
            StageFlow::Terminal(response) => response,
            StageFlow::Continue => match self.builtin_response(&req) {
                Some(response) => response,
                None => match self.dispatcher.dispatch(req, &ctx).await {
                    Ok(response) => response,
                    Err(e) => {
                        let status = e.status();
                        tracing::warn!(%status, "dispatch failed: {e}");
                        self.overrides
                            .apply(status, &original_uri, self.pages.as_ref())
                            .unwrap_or_else(|| default_error_response(status))
                    }
                },
            },
        };

        ctx.finalize(&mut response);
        response
    }

    /// Endpoints served by the gateway itself, after the pipeline and before
    /// proxy dispatch.
    fn builtin_response(&self, req: &Request<Body>) -> Option<Response<Body>> {
        let path = req.uri().path();

        if req.method() == Method::GET && path == PATH_PROXY_PING_API {
            return Response::builder()
                .status(StatusCode::OK)
                .body(Body::from("pong"))
                .ok();
        }

        if path == "/favicon.ico" {
            return Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::empty())
                .ok();
        }

        if let Some(mount) = &self.sys_mount {
            if req.method() == Method::GET && path == PATH_SYS_METRICS_API {
                return Some(admin::handle_metrics_request(
                    req.headers(),
                    req.uri().query(),
                    &mount.api_key,
                    &self.metrics,
                ));
            }
        }

        None
    }
}

/// Default error body when no override matches: status line only, never any
/// internal detail.
fn default_error_response(status: StatusCode) -> Response<Body> {
    let text = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    Response::builder()
        .status(status)
        .body(Body::from(text))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use http_body_util::BodyExt;

    use super::*;
    use crate::{
        core::{Pipeline, UpstreamRouter},
        ports::{HttpClient, HttpClientError, HttpClientResult},
    };

    struct RefusingClient;

    #[async_trait]
    impl HttpClient for RefusingClient {
        async fn send_request(
            &self,
            _req: Request<Body>,
        ) -> HttpClientResult<Response<Body>> {
            Err(HttpClientError::ConnectionError("refused".to_string()))
        }
    }

    fn handler(specs: &[&str], overrides: &[(&str, &str)]) -> GatewayHandler {
        let metrics = Arc::new(MetricsRegistry::new());
        let router = Arc::new(
            UpstreamRouter::from_specs(
                &specs.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )
            .unwrap(),
        );
        let dispatcher = ProxyDispatcher::new(router, Arc::new(RefusingClient), metrics.clone());
        let map = overrides
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayHandler::new(
            Pipeline::new(Vec::new()),
            dispatcher,
            StatusOverrides::from_config(&map),
            Arc::new(crate::adapters::pages::EmbeddedPages::new()),
            metrics,
            None,
        )
    }

    fn request(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_ping_builtin() {
        let handler = handler(&[], &[]);
        let response = handler
            .handle_request(request(PATH_PROXY_PING_API), None, Scheme::Http)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"pong");
    }

    #[tokio::test]
    async fn test_no_route_yields_404_default_body() {
        let handler = handler(&[], &[]);
        let response = handler
            .handle_request(request("/missing"), None, Scheme::Http)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upstream_failure_becomes_502_then_override_page() {
        // Without an override: plain 502.
        let handler_plain = handler(&["http://a:1/api"], &[]);
        let response = handler_plain
            .handle_request(request("/api/x"), None, Scheme::Http)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        // With a page override: 503 HTML substitution.
        let handler = handler(&["http://a:1/api"], &[("502", "error.html")]);
        let response = handler
            .handle_request(request("/api/x"), None, Scheme::Http)
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(
            response.headers()[http::header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
    }

    #[tokio::test]
    async fn test_redirect_override_attaches_next() {
        let handler = handler(&["http://a:1/api"], &[("502", "/login")]);
        let response = handler
            .handle_request(request("/api/x?q=1"), None, Scheme::Http)
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[http::header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("/login?next="));
    }
}
