//! Scheme and canonical-host redirect enforcement.
use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response, StatusCode, header};

use crate::core::{
    context::{RequestContext, Scheme},
    pipeline::{Stage, StageFlow},
};

/// Optionally forces the `https://` scheme and/or the canonical `www.` host
/// form. The www redirect is skipped per request for any host that already
/// carries a subdomain.
pub struct RedirectEnforcer {
    https: bool,
    www: bool,
}

impl RedirectEnforcer {
    pub fn new(https: bool, www: bool) -> Self {
        Self { https, www }
    }
}

fn host_of(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string))
}

/// `sub.example.com` has one, `example.com` does not. The port does not
/// count as a label.
fn has_subdomain(host: &str) -> bool {
    let bare = host.rsplit_once(':').map_or(host, |(h, _)| h);
    bare.split('.').count() > 2
}

fn moved_permanently(location: String) -> StageFlow {
    let response = Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap_or_else(|_| Response::new(Body::empty()));
    StageFlow::Terminal(response)
}

#[async_trait]
impl Stage for RedirectEnforcer {
    fn name(&self) -> &'static str {
        "redirect"
    }

    async fn process(&self, req: &mut Request<Body>, ctx: &mut RequestContext) -> StageFlow {
        let Some(host) = host_of(req) else {
            return StageFlow::Continue;
        };
        let path_and_query = req
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();

        if self.https && ctx.scheme == Scheme::Http {
            return moved_permanently(format!("https://{host}{path_and_query}"));
        }

        if self.www && !has_subdomain(&host) {
            return moved_permanently(format!(
                "{}://www.{host}{path_and_query}",
                ctx.scheme.as_str()
            ));
        }

        StageFlow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: &str, path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header(header::HOST, host)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_https_upgrade() {
        let stage = RedirectEnforcer::new(true, false);
        let mut req = request("example.com", "/a?b=c");
        let mut ctx = RequestContext::new(None, Scheme::Http);

        match stage.process(&mut req, &mut ctx).await {
            StageFlow::Terminal(response) => {
                assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
                assert_eq!(
                    response.headers()[header::LOCATION],
                    "https://example.com/a?b=c"
                );
            }
            StageFlow::Continue => panic!("expected redirect"),
        }
    }

    #[tokio::test]
    async fn test_https_request_is_not_upgraded() {
        let stage = RedirectEnforcer::new(true, false);
        let mut req = request("example.com", "/a");
        let mut ctx = RequestContext::new(None, Scheme::Https);
        assert!(matches!(
            stage.process(&mut req, &mut ctx).await,
            StageFlow::Continue
        ));
    }

    #[tokio::test]
    async fn test_www_redirect_for_apex_host() {
        let stage = RedirectEnforcer::new(false, true);
        let mut req = request("example.com", "/");
        let mut ctx = RequestContext::new(None, Scheme::Https);

        match stage.process(&mut req, &mut ctx).await {
            StageFlow::Terminal(response) => {
                assert_eq!(
                    response.headers()[header::LOCATION],
                    "https://www.example.com/"
                );
            }
            StageFlow::Continue => panic!("expected redirect"),
        }
    }

    #[tokio::test]
    async fn test_subdomain_skips_www_redirect() {
        let stage = RedirectEnforcer::new(false, true);
        let mut ctx = RequestContext::new(None, Scheme::Https);

        for host in ["www.example.com", "api.example.com", "a.b.example.com:443"] {
            let mut req = request(host, "/");
            assert!(
                matches!(
                    stage.process(&mut req, &mut ctx).await,
                    StageFlow::Continue
                ),
                "host {host} must not redirect"
            );
        }
    }
}
