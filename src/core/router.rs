//! Path-prefix routing to upstream groups.
//!
//! Groups are registered at build time from upstream spec strings
//! (`scheme://host[:port]/prefix[?server=...&rewrite=from:to]`) and kept in
//! declaration order. Matching is by path prefix; the first registered group
//! that matches wins (order-of-registration semantics, not longest-prefix).
use std::sync::Arc;

use eyre::{Result, eyre};
use url::Url;

use crate::core::{
    balancer::{RoundRobin, retry_budget},
    rewrite::{self, RewriteRule},
};

/// One upstream origin plus an opaque identity used for logging/selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    /// `scheme://host[:port]`, no trailing slash.
    pub origin: String,
    pub name: String,
}

/// A path-prefix-addressed set of targets sharing a balancer cursor and
/// rewrite rules. Immutable after construction; the cursor is internally
/// synchronized.
pub struct UpstreamGroup {
    pub prefix: String,
    targets: Vec<UpstreamTarget>,
    rewrites: Vec<RewriteRule>,
    cursor: RoundRobin,
}

impl UpstreamGroup {
    /// Parse a single upstream spec. The URL itself failing to parse is fatal
    /// at startup; malformed rewrite tokens are logged and skipped.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let url = Url::parse(spec).map_err(|e| eyre!("cannot parse upstream {spec:?}: {e}"))?;
        let host = url
            .host_str()
            .ok_or_else(|| eyre!("upstream {spec:?} has no host"))?;

        let mut origin = format!("{}://{}", url.scheme(), host);
        if let Some(port) = url.port() {
            origin = format!("{origin}:{port}");
        }

        let mut targets = vec![UpstreamTarget {
            name: origin.clone(),
            origin,
        }];

        let mut rewrite_tokens = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                // Extra targets share the primary scheme; the value carries
                // host[:port].
                "server" => {
                    let origin = format!("{}://{}", url.scheme(), value);
                    targets.push(UpstreamTarget {
                        name: origin.clone(),
                        origin,
                    });
                }
                "rewrite" => rewrite_tokens.push(value.to_string()),
                _ => {}
            }
        }

        let mut prefix = url.path().to_string();
        if prefix.is_empty() {
            prefix = "/".to_string();
        }

        Ok(Self {
            prefix,
            targets,
            rewrites: rewrite::parse_rules(&rewrite_tokens),
            cursor: RoundRobin::new(),
        })
    }

    pub fn targets(&self) -> &[UpstreamTarget] {
        &self.targets
    }

    /// Advance the rotating cursor and return the selected target. Groups
    /// always hold at least one target.
    pub fn select(&self) -> &UpstreamTarget {
        let index = self
            .cursor
            .select(self.targets.len())
            .expect("upstream group invariant: at least one target");
        &self.targets[index]
    }

    /// Remaining attempts after the first: `len(targets) - 1`.
    pub fn retry_budget(&self) -> usize {
        retry_budget(self.targets.len())
    }

    /// Apply this group's rewrite rules to a request path.
    pub fn rewrite(&self, path: &str) -> String {
        rewrite::apply(&self.rewrites, path)
    }
}

/// Maps request paths to upstream groups.
pub struct UpstreamRouter {
    groups: Vec<Arc<UpstreamGroup>>,
}

impl UpstreamRouter {
    /// Build the router from configured upstream specs. Any unparsable spec
    /// aborts startup.
    pub fn from_specs(specs: &[String]) -> Result<Self> {
        let mut groups = Vec::with_capacity(specs.len());
        for spec in specs {
            let group = UpstreamGroup::parse(spec)?;
            for target in group.targets() {
                tracing::info!("adding proxy upstream: {} => {}", group.prefix, target.origin);
            }
            groups.push(Arc::new(group));
        }
        Ok(Self { groups })
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[Arc<UpstreamGroup>] {
        &self.groups
    }

    /// `resolve(path) -> (group, rewritten path)`. First matching prefix in
    /// declaration order wins.
    pub fn resolve(&self, path: &str) -> Option<(Arc<UpstreamGroup>, String)> {
        self.groups
            .iter()
            .find(|group| path.starts_with(group.prefix.as_str()))
            .map(|group| (group.clone(), group.rewrite(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_target() {
        let group = UpstreamGroup::parse("http://127.0.0.1:10082/test2").unwrap();
        assert_eq!(group.prefix, "/test2");
        assert_eq!(group.targets().len(), 1);
        assert_eq!(group.targets()[0].origin, "http://127.0.0.1:10082");
    }

    #[test]
    fn test_parse_extra_servers_share_scheme() {
        let group =
            UpstreamGroup::parse("http://127.0.0.1:10082/test2?server=127.0.0.1:10083").unwrap();
        let origins: Vec<&str> = group.targets().iter().map(|t| t.origin.as_str()).collect();
        assert_eq!(
            origins,
            vec!["http://127.0.0.1:10082", "http://127.0.0.1:10083"]
        );
    }

    #[test]
    fn test_parse_rewrite_rules_and_skip_malformed() {
        let group = UpstreamGroup::parse(
            "http://127.0.0.1:10082/app?rewrite=/app:/internal&rewrite=broken",
        )
        .unwrap();
        assert_eq!(group.rewrite("/app/page"), "/internal/page");
        assert_eq!(group.rewrite("/other"), "/other");
    }

    #[test]
    fn test_parse_rejects_garbage_spec() {
        assert!(UpstreamGroup::parse("not a url").is_err());
    }

    #[test]
    fn test_resolve_first_registered_prefix_wins() {
        let router = UpstreamRouter::from_specs(&[
            "http://127.0.0.1:9001/api".to_string(),
            "http://127.0.0.1:9002/api/v2".to_string(),
        ])
        .unwrap();

        // Declaration order, not longest prefix: /api wins even for /api/v2.
        let (group, path) = router.resolve("/api/v2/users").unwrap();
        assert_eq!(group.prefix, "/api");
        assert_eq!(path, "/api/v2/users");
        assert!(router.resolve("/unmatched").is_none());
    }

    #[test]
    fn test_round_robin_over_group_targets() {
        let group =
            UpstreamGroup::parse("http://a:1/x?server=b:2&server=c:3").unwrap();
        let picks: Vec<&str> = (0..4).map(|_| group.select().origin.as_str()).collect();
        assert_eq!(
            picks,
            vec!["http://a:1", "http://b:2", "http://c:3", "http://a:1"]
        );
        assert_eq!(group.retry_budget(), 2);
    }
}
