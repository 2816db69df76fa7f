use bytes::Bytes;

/// PageRenderer defines the port for serving named static pages (maintenance
/// banner, status override bodies). Renderers never fail hard: a missing page
/// is `None` and callers degrade to a plain-text body.
pub trait PageRenderer: Send + Sync + 'static {
    /// Fetch the HTML body for a page name such as `maint.html`.
    fn render(&self, name: &str) -> Option<Bytes>;
}
