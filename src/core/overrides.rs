//! Status override handling.
//!
//! Intercepts locally generated terminal errors (nothing written yet) and
//! substitutes a configured static page or redirect. A `*.html` value is
//! served as HTML with status 503; an absolute path becomes a 303 redirect
//! carrying the original request URL in a `next` query parameter so the
//! client can return after the action. Everything else degrades to the
//! default error renderer.
use std::collections::HashMap;

use axum::body::Body;
use http::{Response, StatusCode, Uri, header};

use crate::ports::PageRenderer;

#[derive(Debug, Clone, PartialEq, Eq)]
enum OverrideAction {
    Page(String),
    Redirect(String),
}

/// Immutable status -> action table built once at startup.
pub struct StatusOverrides {
    actions: HashMap<u16, OverrideAction>,
}

impl StatusOverrides {
    pub fn from_config(raw: &HashMap<String, String>) -> Self {
        let mut actions = HashMap::new();
        for (status, value) in raw {
            let Ok(status) = status.parse::<u16>() else {
                tracing::error!("unusable override status key: {status:?}");
                continue;
            };
            if value.ends_with(".html") {
                actions.insert(status, OverrideAction::Page(value.clone()));
            } else if value.starts_with('/') {
                actions.insert(status, OverrideAction::Redirect(value.clone()));
            } else {
                tracing::error!("unusable override for status {status}: {value:?}");
            }
        }
        if !actions.is_empty() {
            tracing::info!("status overrides: {:?}", actions.keys().collect::<Vec<_>>());
        }
        Self { actions }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Look up and render the override for a terminal status. Lookups never
    /// fail; a page that cannot be rendered is logged and yields `None` so
    /// the caller falls back to the default error body.
    pub fn apply(
        &self,
        status: StatusCode,
        original_uri: &Uri,
        pages: &dyn PageRenderer,
    ) -> Option<Response<Body>> {
        match self.actions.get(&status.as_u16())? {
            OverrideAction::Page(name) => match pages.render(name) {
                Some(body) => Response::builder()
                    .status(StatusCode::SERVICE_UNAVAILABLE)
                    .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                    .body(Body::from(body))
                    .ok(),
                None => {
                    tracing::error!("error on get override page: {name}");
                    None
                }
            },
            OverrideAction::Redirect(path) => {
                let location = format!(
                    "{path}?next={}",
                    urlencoding::encode(&original_uri.to_string())
                );
                match Response::builder()
                    .status(StatusCode::SEE_OTHER)
                    .header(header::LOCATION, location)
                    .body(Body::empty())
                {
                    Ok(response) => Some(response),
                    Err(e) => {
                        tracing::error!("error on build override redirect: {e}");
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    struct FixedPages;

    impl PageRenderer for FixedPages {
        fn render(&self, name: &str) -> Option<Bytes> {
            (name == "maint.html").then(|| Bytes::from_static(b"<html>down</html>"))
        }
    }

    fn overrides(entries: &[(&str, &str)]) -> StatusOverrides {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StatusOverrides::from_config(&map)
    }

    #[test]
    fn test_page_override_serves_503_html() {
        let overrides = overrides(&[("502", "maint.html")]);
        let uri: Uri = "/shop/cart".parse().unwrap();
        let response = overrides
            .apply(StatusCode::BAD_GATEWAY, &uri, &FixedPages)
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
    }

    #[test]
    fn test_redirect_override_carries_next_param() {
        let overrides = overrides(&[("404", "/login")]);
        let uri: Uri = "/account/settings?tab=a".parse().unwrap();
        let response = overrides
            .apply(StatusCode::NOT_FOUND, &uri, &FixedPages)
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("/login?next="));
        assert!(location.contains("%2Faccount%2Fsettings"));
    }

    #[test]
    fn test_missing_entry_and_broken_page_fall_back() {
        let overrides = overrides(&[("502", "missing.html")]);
        let uri: Uri = "/".parse().unwrap();
        // No entry for 404 at all.
        assert!(
            overrides
                .apply(StatusCode::NOT_FOUND, &uri, &FixedPages)
                .is_none()
        );
        // Entry exists but renderer has no such page.
        assert!(
            overrides
                .apply(StatusCode::BAD_GATEWAY, &uri, &FixedPages)
                .is_none()
        );
    }

    #[test]
    fn test_unclassifiable_values_are_skipped() {
        let overrides = overrides(&[("500", "ftp://weird")]);
        assert!(overrides.is_empty());
    }
}
