//! The ordered policy pipeline.
//!
//! Every request passes through a fixed chain of [`Stage`]s before proxy
//! dispatch. A stage either lets the request continue or terminates it with
//! a response; later stages (and the proxy) never run for a terminated
//! request. The chain runner isolates panicking stages so a single request
//! fault cannot take down a listener.
use std::{panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use futures_util::FutureExt;
use http::{Request, Response, StatusCode};

use crate::{
    config::models::AppConfig,
    core::{
        context::RequestContext,
        stages::{
            access_log::AccessLog, body_limit::BodyLimit, cors::Cors, csrf::CsrfGuard,
            geoip::GeoIpGate, headers::HeaderEditor, maintenance::MaintenanceGate,
            rate_limit::RateLimit, redirect::RedirectEnforcer, request_id::RequestIdTagger,
        },
    },
    ports::{GeoResolver, PageRenderer},
    utils::graceful_shutdown::ShutdownToken,
};

/// Outcome of a single stage.
pub enum StageFlow {
    /// Pass the request to the next stage (or to proxy dispatch).
    Continue,
    /// Stop here and send this response to the client.
    Terminal(Response<Body>),
}

/// One policy unit in the request pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow;
}

/// Immutable-after-build ordered stage chain.
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Assemble the chain from the configuration snapshot. Order is
    /// significant and fixed; disabled policies are simply not added.
    pub fn from_config(
        config: &Arc<AppConfig>,
        geo_resolver: Option<Arc<dyn GeoResolver>>,
        pages: Arc<dyn PageRenderer>,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        let http = &config.http_server;
        let mut stages: Vec<Arc<dyn Stage>> = Vec::new();

        if config.geo_ip.enabled {
            if let Some(resolver) = geo_resolver {
                stages.push(Arc::new(GeoIpGate::new(&config.geo_ip, resolver)));
            } else {
                tracing::warn!("geo gate enabled but no resolver available, skipping stage");
            }
        }

        if http.access_log {
            stages.push(Arc::new(AccessLog::new()));
        }

        if config.is_maint {
            tracing::warn!("maintenance mode active: all requests answered with 503");
            stages.push(Arc::new(MaintenanceGate::new(pages.clone())));
        }

        if http.redirect_https || http.redirect_www {
            stages.push(Arc::new(RedirectEnforcer::new(
                http.redirect_https,
                http.redirect_www,
            )));
        }

        if let Some(editor) = HeaderEditor::from_config(http) {
            stages.push(Arc::new(editor));
        }

        if http.csrf {
            stages.push(Arc::new(CsrfGuard::new(&http.csrf_skip_pattern)?));
            tracing::info!("csrf stage enabled");
        } else {
            tracing::warn!("csrf stage disabled");
        }

        if !http.body_limit.is_empty() {
            stages.push(Arc::new(BodyLimit::new(&http.body_limit)?));
            tracing::info!("body limit is: {}", http.body_limit);
        }

        if !http.allow_origins.is_empty() {
            stages.push(Arc::new(Cors::new(http.allow_origins.clone())));
            tracing::info!("allow origins: {:?}", http.allow_origins);
        }

        if http.rate_limit > 0.0 {
            stages.push(Arc::new(RateLimit::new(
                http.rate_limit,
                http.rate_burst,
                shutdown,
            )?));
        } else {
            tracing::warn!("rate limit not active");
        }

        if http.request_id {
            stages.push(Arc::new(RequestIdTagger::new()));
        }

        tracing::info!(
            "pipeline built with {} stages: {:?}",
            stages.len(),
            stages.iter().map(|s| s.name()).collect::<Vec<_>>()
        );

        Ok(Self::new(stages))
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the chain in order. Any stage may short-circuit with a terminal
    /// response; a panicking stage is contained and converted to a generic
    /// 500 so the process keeps serving other requests.
    pub async fn run(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow {
        for stage in &self.stages {
            let outcome = AssertUnwindSafe(stage.process(req, ctx))
                .catch_unwind()
                .await;
            match outcome {
                Ok(StageFlow::Continue) => {}
                Ok(StageFlow::Terminal(response)) => {
                    tracing::debug!(stage = stage.name(), status = %response.status(), "stage terminated request");
                    return StageFlow::Terminal(response);
                }
                Err(panic) => {
                    let detail = panic_message(panic.as_ref());
                    tracing::error!(
                        stage = stage.name(),
                        method = %req.method(),
                        path = %req.uri().path(),
                        "stage panicked: {detail}"
                    );
                    return StageFlow::Terminal(internal_error_response());
                }
            }
        }
        StageFlow::Continue
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Generic server-error response used when a stage fault is contained. No
/// internal detail ever reaches the response body.
pub fn internal_error_response() -> Response<Body> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(Body::from("Internal Server Error"))
        .unwrap_or_else(|_| Response::new(Body::from("Internal Server Error")))
}
