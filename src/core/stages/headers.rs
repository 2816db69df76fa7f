//! Response header editing and conditional CSP injection.
use async_trait::async_trait;
use axum::body::Body;
use http::{HeaderName, HeaderValue, Request, header};

use crate::{
    config::models::HttpServerConfig,
    core::{
        context::RequestContext,
        pipeline::{Stage, StageFlow},
    },
};

/// Deletes configured response headers, adds configured pairs, and injects a
/// Content-Security-Policy header on HTML responses only. Runs as a response
/// finalization hook, never on the forward path.
pub struct HeaderEditor {
    del: Vec<HeaderName>,
    add: Vec<(HeaderName, HeaderValue)>,
    content_policy: Option<HeaderValue>,
}

impl HeaderEditor {
    /// Returns `None` when no header edits are configured so the stage can be
    /// left out of the chain entirely.
    pub fn from_config(config: &HttpServerConfig) -> Option<Self> {
        let mut del = Vec::new();
        for name in &config.headers_del {
            match name.parse::<HeaderName>() {
                Ok(parsed) => del.push(parsed),
                Err(e) => tracing::warn!("invalid header name to delete {name:?}: {e}"),
            }
        }

        // "Name: value" pairs; entries without a colon are skipped.
        let mut add = Vec::new();
        for pair in &config.headers_add {
            let Some((name, value)) = pair.split_once(':') else {
                tracing::warn!("invalid header pair {pair:?}, expected 'Name: value'");
                continue;
            };
            match (
                name.trim().parse::<HeaderName>(),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => add.push((name, value)),
                _ => tracing::warn!("invalid header pair {pair:?}"),
            }
        }

        let content_policy = if config.content_policy.is_empty() {
            None
        } else {
            match HeaderValue::from_str(&config.content_policy) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("invalid content policy value: {e}");
                    None
                }
            }
        };

        if del.is_empty() && add.is_empty() && content_policy.is_none() {
            return None;
        }

        if !del.is_empty() {
            tracing::info!("headers del: {del:?}");
        }
        if !add.is_empty() {
            tracing::info!("headers add: {add:?}");
        }
        if content_policy.is_some() {
            tracing::info!("content policy: {}", config.content_policy);
        }

        Some(Self {
            del,
            add,
            content_policy,
        })
    }
}

#[async_trait]
impl Stage for HeaderEditor {
    fn name(&self) -> &'static str {
        "headers"
    }

    async fn process(&self, _req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow {
        let del = self.del.clone();
        let add = self.add.clone();
        let content_policy = self.content_policy.clone();

        ctx.push_hook(Box::new(move |response, _ctx| {
            let headers = response.headers_mut();
            for name in &del {
                headers.remove(name);
            }
            for (name, value) in add {
                headers.append(name, value);
            }
            if let Some(policy) = content_policy {
                let is_html = headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.starts_with("text/html"));
                if is_html {
                    headers.append(header::CONTENT_SECURITY_POLICY, policy);
                }
            }
        }));

        StageFlow::Continue
    }
}
