use http::StatusCode;
use thiserror::Error;

/// Terminal failures produced by the dispatch path. These are the only
/// statuses eligible for status-override substitution: they are generated
/// locally, before any response bytes were written.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no upstream route matches path {path}")]
    NoRoute { path: String },

    #[error("all targets failed for upstream group {prefix}")]
    UpstreamUnavailable { prefix: String },

    #[error("malformed request: {0}")]
    BadRequest(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoRoute { .. } => StatusCode::NOT_FOUND,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}
