//! Cookie-bound CSRF protection.
//!
//! Unsafe methods must present the token from the `_csrf` cookie in the
//! `X-CSRF-Token` header or `_csrf` form field. The auth status endpoint
//! (`GET /auth/api/status`) bootstraps clients: it issues/refreshes the
//! cookie and mirrors the token into a response header. Asset-like paths are
//! always exempt.
use async_trait::async_trait;
use axum::body::Body;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use rand::Rng as _;
use regex::Regex;
use subtle::ConstantTimeEq as _;

use crate::{
    config::consts::PATH_AUTH_STATUS_API,
    core::{
        context::RequestContext,
        pipeline::{Stage, StageFlow},
    },
};

const COOKIE_NAME: &str = "_csrf";
const HEADER_NAME: &str = "X-CSRF-Token";
const FORM_FIELD: &str = "_csrf";

pub struct CsrfGuard {
    skip: Regex,
}

impl CsrfGuard {
    pub fn new(skip_pattern: &str) -> eyre::Result<Self> {
        Ok(Self {
            skip: Regex::new(skip_pattern)?,
        })
    }

    fn forbidden(reason: &str) -> StageFlow {
        tracing::debug!("csrf rejection: {reason}");
        StageFlow::Terminal(
            Response::builder()
                .status(StatusCode::FORBIDDEN)
                .body(Body::from("invalid csrf token"))
                .unwrap_or_else(|_| Response::new(Body::empty())),
        )
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for raw in headers.get_all(header::COOKIE) {
        let Ok(raw) = raw.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn is_form_urlencoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"))
}

/// Pull the token from the form body, leaving a replayable buffered body in
/// the request.
async fn form_token(req: &mut Request<Body>) -> Option<String> {
    if !is_form_urlencoded(req.headers()) {
        return None;
    }
    let body = std::mem::replace(req.body_mut(), Body::empty());
    let bytes: Bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!("cannot read form body for csrf check: {e}");
            return None;
        }
    };
    let token = url::form_urlencoded::parse(&bytes)
        .find(|(key, _)| key == FORM_FIELD)
        .map(|(_, value)| value.to_string());
    *req.body_mut() = Body::from(bytes);
    token
}

#[async_trait]
impl Stage for CsrfGuard {
    fn name(&self) -> &'static str {
        "csrf"
    }

    async fn process(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow {
        let path = req.uri().path().to_string();
        if self.skip.is_match(&path) {
            return StageFlow::Continue;
        }

        let is_auth_status = req.method() == Method::GET && path == PATH_AUTH_STATUS_API;
        if is_safe_method(req.method()) && !is_auth_status {
            return StageFlow::Continue;
        }

        let cookie_token = cookie_value(req.headers(), COOKIE_NAME);

        if is_auth_status {
            let token = cookie_token.unwrap_or_else(generate_token);
            ctx.csrf_token = Some(token.clone());
            let secure = ctx.scheme.is_secure();
            ctx.push_hook(Box::new(move |response, _ctx| {
                let mut cookie = format!("{COOKIE_NAME}={token}; Path=/; HttpOnly");
                if secure {
                    cookie.push_str("; Secure");
                }
                if let Ok(value) = HeaderValue::from_str(&cookie) {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
                if let Ok(value) = HeaderValue::from_str(&token) {
                    response.headers_mut().insert(HEADER_NAME, value);
                }
            }));
            return StageFlow::Continue;
        }

        // Unsafe method: validate the presented token against the cookie.
        let Some(secret) = cookie_token else {
            return Self::forbidden("missing token cookie");
        };

        let presented = match req
            .headers()
            .get(HEADER_NAME)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        {
            Some(token) => Some(token),
            None => form_token(req).await,
        };
        let Some(presented) = presented else {
            return Self::forbidden("no token presented");
        };

        if presented.as_bytes().ct_eq(secret.as_bytes()).into() {
            ctx.csrf_token = Some(secret);
            StageFlow::Continue
        } else {
            Self::forbidden("token mismatch")
        }
    }
}
