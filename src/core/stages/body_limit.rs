//! Request body size ceiling.
use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use http::{Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Limited};

use crate::{
    config::models::parse_size,
    core::{
        context::RequestContext,
        pipeline::{Stage, StageFlow},
    },
};

/// Rejects requests whose body exceeds the configured ceiling with 413. The
/// body is buffered under the limit and put back into the request, which also
/// makes it replayable for balancer retries.
pub struct BodyLimit {
    max_bytes: u64,
}

impl BodyLimit {
    pub fn new(limit: &str) -> eyre::Result<Self> {
        let max_bytes = parse_size(limit).map_err(|e| eyre::eyre!(e))?;
        Ok(Self { max_bytes })
    }

    fn too_large() -> StageFlow {
        StageFlow::Terminal(
            Response::builder()
                .status(StatusCode::PAYLOAD_TOO_LARGE)
                .body(Body::from("request entity too large"))
                .unwrap_or_else(|_| Response::new(Body::empty())),
        )
    }
}

#[async_trait]
impl Stage for BodyLimit {
    fn name(&self) -> &'static str {
        "body_limit"
    }

    async fn process(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow {
        // Declared length first: reject before reading anything.
        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(length) = declared {
            if length > self.max_bytes {
                tracing::debug!(
                    length,
                    max = self.max_bytes,
                    path = req.uri().path(),
                    client = ?ctx.client_addr,
                    "declared body over limit"
                );
                return Self::too_large();
            }
        }

        let body = std::mem::replace(req.body_mut(), Body::empty());
        let limited = Limited::new(body, self.max_bytes as usize);
        match limited.collect().await {
            Ok(collected) => {
                let bytes: Bytes = collected.to_bytes();
                *req.body_mut() = Body::from(bytes);
                StageFlow::Continue
            }
            Err(e) => {
                tracing::debug!(
                    max = self.max_bytes,
                    path = req.uri().path(),
                    "body rejected: {e}"
                );
                Self::too_large()
            }
        }
    }
}
