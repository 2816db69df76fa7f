//! Literal path-prefix rewrite rules.
//!
//! Rules are ordered `from -> to` prefix substitutions supplied on the
//! upstream spec (`?rewrite=/a:/b`). At most one rule applies per request:
//! the first whose `from` part prefixes the path. Malformed rule strings are
//! logged and skipped at parse time; they never abort startup.

/// A single literal prefix substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub from: String,
    pub to: String,
}

/// Parse `from:to` rule strings, dropping malformed entries with a log line.
pub fn parse_rules(raw: &[String]) -> Vec<RewriteRule> {
    let mut rules = Vec::new();
    for value in raw {
        match value.split_once(':') {
            Some((from, to)) if !from.is_empty() => rules.push(RewriteRule {
                from: from.to_string(),
                to: to.to_string(),
            }),
            _ => tracing::error!("cannot parse token for rewrite: {value}"),
        }
    }
    if !rules.is_empty() {
        tracing::info!("rewrite path rules: {rules:?}");
    }
    rules
}

/// Apply the first matching rule; paths with no match pass through unchanged.
pub fn apply(rules: &[RewriteRule], path: &str) -> String {
    for rule in rules {
        if let Some(rest) = path.strip_prefix(rule.from.as_str()) {
            return format!("{}{}", rule.to, rest);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(raw: &[&str]) -> Vec<RewriteRule> {
        parse_rules(&raw.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_prefix_substitution() {
        let rules = rules(&["/a:/b"]);
        assert_eq!(apply(&rules, "/a/x"), "/b/x");
        assert_eq!(apply(&rules, "/a"), "/b");
    }

    #[test]
    fn test_no_match_passes_through() {
        let rules = rules(&["/a:/b"]);
        assert_eq!(apply(&rules, "/c/x"), "/c/x");
    }

    #[test]
    fn test_first_match_wins() {
        let rules = rules(&["/api/v1:/v1", "/api:/legacy"]);
        assert_eq!(apply(&rules, "/api/v1/users"), "/v1/users");
        assert_eq!(apply(&rules, "/api/other"), "/legacy/other");
    }

    #[test]
    fn test_malformed_rules_are_skipped() {
        let rules = rules(&["missing-colon", ":/only-to", "/ok:/fine"]);
        assert_eq!(
            rules,
            vec![RewriteRule {
                from: "/ok".to_string(),
                to: "/fine".to_string()
            }]
        );
    }
}
