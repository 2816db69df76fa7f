//! Origin allow-list CORS handling.
use async_trait::async_trait;
use axum::body::Body;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};

use crate::core::{
    context::RequestContext,
    pipeline::{Stage, StageFlow},
};

/// Answers preflight requests for allowed origins and reflects the origin on
/// regular responses. Only configured origins (or `*`) are served.
pub struct Cors {
    origins: Vec<String>,
}

impl Cors {
    pub fn new(origins: Vec<String>) -> Self {
        Self { origins }
    }

    fn allowed(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| o == "*" || o == origin)
    }
}

fn apply_cors_headers(response: &mut Response<Body>, origin: &HeaderValue) {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
}

#[async_trait]
impl Stage for Cors {
    fn name(&self) -> &'static str {
        "cors"
    }

    async fn process(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow {
        let Some(origin) = req.headers().get(header::ORIGIN).cloned() else {
            return StageFlow::Continue;
        };
        let allowed = origin
            .to_str()
            .map(|value| self.allowed(value))
            .unwrap_or(false);

        if req.method() == Method::OPTIONS {
            let mut response = Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(Body::empty())
                .unwrap_or_else(|_| Response::new(Body::empty()));
            if allowed {
                apply_cors_headers(&mut response, &origin);
                let headers = response.headers_mut();
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
                );
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    HeaderValue::from_static("Content-Type, Authorization, X-Requested-With"),
                );
                headers.insert(
                    header::ACCESS_CONTROL_MAX_AGE,
                    HeaderValue::from_static("86400"),
                );
            }
            return StageFlow::Terminal(response);
        }

        if allowed {
            ctx.push_hook(Box::new(move |response, _ctx| {
                apply_cors_headers(response, &origin);
            }));
        }

        StageFlow::Continue
    }
}
