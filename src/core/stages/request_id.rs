//! Request-id tagging for tracing.
use async_trait::async_trait;
use axum::body::Body;
use http::{HeaderValue, Request};

use crate::core::{
    context::RequestContext,
    pipeline::{Stage, StageFlow},
};

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Attaches a unique identifier to the request and response. An identifier
/// already supplied by a trusted fronting hop is kept.
pub struct RequestIdTagger;

impl RequestIdTagger {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RequestIdTagger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for RequestIdTagger {
    fn name(&self) -> &'static str {
        "request_id"
    }

    async fn process(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
            ctx.push_hook(Box::new(move |response, _ctx| {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }));
        }
        ctx.request_id = Some(request_id);

        StageFlow::Continue
    }
}
