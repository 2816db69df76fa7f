//! Country gate backed by the external [`GeoResolver`] port.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use http::{HeaderValue, Request, Response, StatusCode};

use crate::{
    config::models::GeoIpConfig,
    core::{
        context::{RequestContext, real_client_ip},
        pipeline::{Stage, StageFlow},
    },
    ports::GeoResolver,
};

pub const COUNTRY_HEADER: &str = "X-Country-Code";

/// Resolves the client IP to a country code, tags the request, and rejects
/// requests from excluded countries with 451. An unknown country is neutral:
/// it passes both the allow and the block check.
pub struct GeoIpGate {
    resolver: Arc<dyn GeoResolver>,
    allow: Vec<String>,
    block: Vec<String>,
}

impl GeoIpGate {
    pub fn new(config: &GeoIpConfig, resolver: Arc<dyn GeoResolver>) -> Self {
        Self {
            resolver,
            allow: config.allow_country.clone(),
            block: config.block_country.clone(),
        }
    }

    /// Allow-list takes precedence over block-list when both are non-empty.
    fn is_blocked(&self, code: &str) -> bool {
        if !self.allow.is_empty() {
            return !self.allow.iter().any(|c| c == code);
        }
        if !self.block.is_empty() {
            return self.block.iter().any(|c| c == code);
        }
        false
    }
}

#[async_trait]
impl Stage for GeoIpGate {
    fn name(&self) -> &'static str {
        "geoip"
    }

    async fn process(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow {
        let ip = real_client_ip(req.headers(), ctx.client_addr);
        let country = ip
            .and_then(|ip| self.resolver.resolve(ip))
            .map(|code| code.to_lowercase())
            .unwrap_or_default();

        // The header is set even when empty so upstreams and the access log
        // always see a consistent field.
        if let Ok(value) = HeaderValue::from_str(&country) {
            req.headers_mut().insert(COUNTRY_HEADER, value);
        }
        if !country.is_empty() {
            ctx.country = Some(country.clone());
        }

        if !country.is_empty() && self.is_blocked(&country) {
            tracing::info!(
                country = %country,
                ip = ?ip,
                path = req.uri().path(),
                "request blocked by geo policy"
            );
            let response = Response::builder()
                .status(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS)
                .body(Body::from("unavailable in your region"))
                .unwrap_or_else(|_| Response::new(Body::empty()));
            return StageFlow::Terminal(response);
        }

        StageFlow::Continue
    }
}
