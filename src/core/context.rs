//! Per-request state threaded through the pipeline.
//!
//! A `RequestContext` is created when a connection worker picks up a request
//! and dropped once the response is written. Stages that only act on the
//! outbound response register [`ResponseHook`]s here instead of
//! short-circuiting the forward path; hooks run exactly once on the final
//! response, whatever produced it (terminal stage, proxy, or error renderer).
use std::{
    net::{IpAddr, SocketAddr},
    time::Instant,
};

use axum::body::Body;
use http::{HeaderMap, Response};

/// Transport scheme the request arrived on, set by the accepting listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Scheme::Https)
    }
}

/// A response finalization hook. Runs after the pipeline/proxy produced the
/// response, in registration order.
pub type ResponseHook = Box<dyn FnOnce(&mut Response<Body>, &RequestContext) + Send + Sync>;

/// Mutable request-scoped state owned by exactly one worker.
pub struct RequestContext {
    pub client_addr: Option<SocketAddr>,
    pub scheme: Scheme,
    /// Lowercase ISO country code attached by the GeoIP gate.
    pub country: Option<String>,
    pub request_id: Option<String>,
    /// Token issued or validated by the CSRF guard.
    pub csrf_token: Option<String>,
    pub received_at: Instant,
    hooks: Vec<ResponseHook>,
}

impl RequestContext {
    pub fn new(client_addr: Option<SocketAddr>, scheme: Scheme) -> Self {
        Self {
            client_addr,
            scheme,
            country: None,
            request_id: None,
            csrf_token: None,
            received_at: Instant::now(),
            hooks: Vec::new(),
        }
    }

    /// Register a response finalization hook.
    pub fn push_hook(&mut self, hook: ResponseHook) {
        self.hooks.push(hook);
    }

    /// Run all registered hooks against the final response. Idempotent: the
    /// hook list is drained on the first call.
    pub fn finalize(&mut self, response: &mut Response<Body>) {
        let hooks = std::mem::take(&mut self.hooks);
        for hook in hooks {
            hook(response, self);
        }
    }
}

/// Best-effort real client IP: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer address.
pub fn real_client_ip(headers: &HeaderMap, client_addr: Option<SocketAddr>) -> Option<IpAddr> {
    if let Some(forwarded_for) = headers.get("X-Forwarded-For") {
        if let Ok(value) = forwarded_for.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("X-Real-IP") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    client_addr.map(|addr| addr.ip())
}
