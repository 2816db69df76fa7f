//! Per-client token-bucket rate limiting built atop `governor`.
use std::{net::IpAddr, num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body;
use eyre::eyre;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
};
use http::{Request, Response, StatusCode};

use crate::{
    core::{
        context::{RequestContext, real_client_ip},
        pipeline::{Stage, StageFlow},
    },
    utils::graceful_shutdown::ShutdownToken,
};

/// Idle window after which a client's bucket is reclaimed.
const BUCKET_EXPIRY: Duration = Duration::from_secs(60);

type IpKeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Token bucket keyed by real client IP. Over-limit requests get 429;
/// requests without a usable identifier get 403. Stale buckets are reclaimed
/// by a background sweeper that observes the shutdown token.
pub struct RateLimit {
    limiter: Arc<IpKeyedLimiter>,
}

impl RateLimit {
    pub fn new(rate: f64, burst: u32, shutdown: ShutdownToken) -> eyre::Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(eyre!("rate limit must be a positive number, got {rate}"));
        }
        let period = Duration::from_secs_f64(1.0 / rate);
        let burst = NonZeroU32::new(burst).unwrap_or_else(|| {
            tracing::warn!("rate burst of 0 clamped to 1");
            NonZeroU32::MIN
        });
        let quota = Quota::with_period(period)
            .ok_or_else(|| eyre!("invalid rate limit period: {period:?}"))?
            .allow_burst(burst);

        tracing::info!(
            "starting rate control: rate={rate}/s burst={burst} expiry={}s",
            BUCKET_EXPIRY.as_secs()
        );

        let limiter = Arc::new(RateLimiter::keyed(quota));
        Self::spawn_sweeper(limiter.clone(), shutdown);
        Ok(Self { limiter })
    }

    fn spawn_sweeper(limiter: Arc<IpKeyedLimiter>, mut shutdown: ShutdownToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BUCKET_EXPIRY);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.retain_recent();
                        tracing::debug!("rate limiter buckets swept, {} live", limiter.len());
                    }
                    _ = shutdown.wait_for_shutdown() => {
                        tracing::debug!("rate limiter sweeper stopping");
                        break;
                    }
                }
            }
        });
    }

    fn reject(status: StatusCode, body: &'static str) -> StageFlow {
        StageFlow::Terminal(
            Response::builder()
                .status(status)
                .body(Body::from(body))
                .unwrap_or_else(|_| Response::new(Body::empty())),
        )
    }
}

#[async_trait]
impl Stage for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn process(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow {
        let Some(ip) = real_client_ip(req.headers(), ctx.client_addr) else {
            return Self::reject(StatusCode::FORBIDDEN, "error while extracting identifier");
        };

        if self.limiter.check_key(&ip).is_err() {
            tracing::debug!(%ip, path = req.uri().path(), "rate limit exceeded");
            return Self::reject(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
        }

        StageFlow::Continue
    }
}
