//! Well-known application constants and route paths.

pub const APP_NAME: &str = "myelin";

/// CSRF bootstrap endpoint: issues/refreshes the token cookie, no-cache.
pub const PATH_AUTH_STATUS_API: &str = "/auth/api/status";

/// Metrics scrape path on the admin listener (or the main one when shared).
pub const PATH_SYS_METRICS_API: &str = "/sys/api/metrics";

/// Liveness endpoint served ahead of proxy dispatch.
pub const PATH_PROXY_PING_API: &str = "/proxy/api/ping";
