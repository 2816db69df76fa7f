//! Static pages embedded at compile time.
use std::collections::HashMap;

use bytes::Bytes;
use once_cell::sync::Lazy;

use crate::ports::PageRenderer;

static PAGES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("maint.html", include_str!("../../web/pages/maint.html")),
        ("error.html", include_str!("../../web/pages/error.html")),
    ])
});

/// Serves the pages bundled into the binary (maintenance banner, generic
/// error body). Deployments needing custom pages plug their own renderer.
pub struct EmbeddedPages;

impl EmbeddedPages {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EmbeddedPages {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRenderer for EmbeddedPages {
    fn render(&self, name: &str) -> Option<Bytes> {
        PAGES.get(name).map(|body| Bytes::from_static(body.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_pages_render() {
        let pages = EmbeddedPages::new();
        let body = pages.render("maint.html").unwrap();
        assert!(body.starts_with(b"<!DOCTYPE html>"));
        assert!(pages.render("error.html").is_some());
    }

    #[test]
    fn test_unknown_page_is_none() {
        let pages = EmbeddedPages::new();
        assert!(pages.render("nope.html").is_none());
    }
}
