//! Structured access logging.
use async_trait::async_trait;
use axum::body::Body;
use http::Request;

use crate::core::{
    context::RequestContext,
    pipeline::{Stage, StageFlow},
};

/// Emits one structured event per request once the final status is known.
/// The event is produced from a response hook so it never blocks the
/// response path. `/favicon.ico` is skipped to keep the log quiet.
pub struct AccessLog;

impl AccessLog {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for AccessLog {
    fn name(&self) -> &'static str {
        "access_log"
    }

    async fn process(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow {
        let path = req.uri().path().to_string();
        if path == "/favicon.ico" {
            return StageFlow::Continue;
        }

        let method = req.method().to_string();
        let query = req.uri().query().map(str::to_string);
        let remote = ctx.client_addr.map(|addr| addr.to_string());

        ctx.push_hook(Box::new(move |response, ctx| {
            tracing::info!(
                target: "myelin::access",
                method = %method,
                path = %path,
                query = query.as_deref().unwrap_or(""),
                status = response.status().as_u16(),
                latency_ms = ctx.received_at.elapsed().as_millis() as u64,
                country = ctx.country.as_deref().unwrap_or(""),
                request_id = ctx.request_id.as_deref().unwrap_or(""),
                remote = remote.as_deref().unwrap_or(""),
                "request"
            );
        }));

        StageFlow::Continue
    }
}

#[cfg(test)]
mod tests {
    use http::Response;

    use super::*;
    use crate::core::context::Scheme;

    #[tokio::test]
    async fn test_registers_hook_for_normal_paths() {
        let stage = AccessLog::new();
        let mut req = Request::builder().uri("/api/x").body(Body::empty()).unwrap();
        let mut ctx = RequestContext::new(None, Scheme::Http);

        assert!(matches!(
            stage.process(&mut req, &mut ctx).await,
            StageFlow::Continue
        ));

        // Finalizing must not panic; the hook only emits a tracing event.
        let mut response = Response::new(Body::empty());
        ctx.finalize(&mut response);
    }

    #[tokio::test]
    async fn test_favicon_is_not_logged() {
        let stage = AccessLog::new();
        let mut req = Request::builder()
            .uri("/favicon.ico")
            .body(Body::empty())
            .unwrap();
        let mut ctx = RequestContext::new(None, Scheme::Http);
        stage.process(&mut req, &mut ctx).await;

        // No hook registered: finalize leaves the response untouched and the
        // drained hook list empty from the start.
        let mut response = Response::new(Body::empty());
        ctx.finalize(&mut response);
        assert!(response.headers().is_empty());
    }
}
