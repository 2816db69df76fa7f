//! Maintenance gate: everything gets a 503 while the flag is up.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response, StatusCode, header};

use crate::{
    core::{
        context::RequestContext,
        pipeline::{Stage, StageFlow},
    },
    ports::PageRenderer,
};

const MAINT_PAGE: &str = "maint.html";
const RETRY_AFTER_SECS: u32 = 10;

/// Unconditionally terminates every request with a 503 carrying a
/// `Retry-After` hint. Later stages, including proxy dispatch, never run.
pub struct MaintenanceGate {
    pages: Arc<dyn PageRenderer>,
}

impl MaintenanceGate {
    pub fn new(pages: Arc<dyn PageRenderer>) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl Stage for MaintenanceGate {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    async fn process(&self, _req: &mut Request<Body>, _ctx: &mut RequestContext) -> StageFlow {
        let builder = Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header(header::RETRY_AFTER, RETRY_AFTER_SECS);

        let response = match self.pages.render(MAINT_PAGE) {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                .body(Body::from(body)),
            None => builder.body(Body::from("service under maintenance")),
        };

        StageFlow::Terminal(
            response.unwrap_or_else(|_| Response::new(Body::from("service under maintenance"))),
        )
    }
}
