//! Reverse-proxy dispatch: route, rewrite, select, forward, retry.
use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, Uri, Version, header::HeaderMap};
use http_body_util::BodyExt;

use crate::{
    core::{GatewayError, RequestContext, UpstreamRouter},
    metrics::MetricsRegistry,
    ports::HttpClient,
};

/// Forwards requests to the upstream group selected by the router. A
/// forwarding (transport) failure is retried against the next target in
/// rotation order until the group's budget is exhausted; upstream responses,
/// including error statuses, pass through untouched.
pub struct ProxyDispatcher {
    router: Arc<UpstreamRouter>,
    http_client: Arc<dyn HttpClient>,
    metrics: Arc<MetricsRegistry>,
}

impl ProxyDispatcher {
    pub fn new(
        router: Arc<UpstreamRouter>,
        http_client: Arc<dyn HttpClient>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            router,
            http_client,
            metrics,
        }
    }

    pub async fn dispatch(
        &self,
        req: Request<Body>,
        ctx: &RequestContext,
    ) -> Result<Response<Body>, GatewayError> {
        let path = req.uri().path().to_string();
        let Some((group, rewritten_path)) = self.router.resolve(&path) else {
            return Err(GatewayError::NoRoute { path });
        };

        let (parts, body) = req.into_parts();
        let method = parts.method;
        let query = parts.uri.query().map(str::to_string);
        let mut headers = parts.headers;
        apply_forwarded_headers(&mut headers, ctx);

        // Buffer once so the bounded retry can replay the body. The body
        // limiter has usually buffered it already.
        let body_bytes: Bytes = body
            .collect()
            .await
            .map_err(|e| GatewayError::BadRequest(format!("cannot read request body: {e}")))?
            .to_bytes();

        let attempts = group.retry_budget() + 1;
        for attempt in 0..attempts {
            let target = group.select();
            self.metrics.record_upstream_attempt(&target.name);

            let uri = match &query {
                Some(query) => format!("{}{rewritten_path}?{query}", target.origin),
                None => format!("{}{rewritten_path}", target.origin),
            };
            let uri: Uri = match uri.parse() {
                Ok(uri) => uri,
                Err(e) => {
                    tracing::error!("cannot build upstream uri {uri:?}: {e}");
                    self.metrics.record_upstream_failure(&target.name);
                    continue;
                }
            };

            let outgoing = build_request(&method, uri, &headers, body_bytes.clone());

            match self.http_client.send_request(outgoing).await {
                Ok(response) => {
                    tracing::debug!(
                        upstream = %target.name,
                        status = response.status().as_u16(),
                        attempt,
                        "upstream responded"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    self.metrics.record_upstream_failure(&target.name);
                    self.metrics.record_upstream_retry();
                    tracing::warn!(
                        upstream = %target.name,
                        attempt,
                        "upstream attempt failed, retrying next target: {e}"
                    );
                }
                Err(e) => {
                    self.metrics.record_upstream_failure(&target.name);
                    tracing::error!(
                        upstream = %target.name,
                        attempt,
                        "upstream attempt failed, budget exhausted: {e}"
                    );
                    break;
                }
            }
        }

        Err(GatewayError::UpstreamUnavailable {
            prefix: group.prefix.clone(),
        })
    }
}

fn build_request(
    method: &Method,
    uri: Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Request<Body> {
    let mut outgoing = Request::new(Body::from(body));
    *outgoing.method_mut() = method.clone();
    *outgoing.uri_mut() = uri;
    *outgoing.version_mut() = Version::HTTP_11;
    *outgoing.headers_mut() = headers.clone();
    outgoing
}

/// Standard forwarded headers; `X-Country-Code` is already on the request
/// when the geo stage ran.
fn apply_forwarded_headers(headers: &mut HeaderMap, ctx: &RequestContext) {
    if let Some(addr) = ctx.client_addr {
        let client_ip = addr.ip().to_string();
        let forwarded = match headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {client_ip}"),
            None => client_ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            headers.insert("X-Forwarded-For", value);
        }
    }

    headers.insert(
        "X-Forwarded-Proto",
        HeaderValue::from_static(ctx.scheme.as_str()),
    );

    if let Some(host) = headers.get(http::header::HOST).cloned() {
        headers.insert("X-Forwarded-Host", host);
    }
}
