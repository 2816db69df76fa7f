//! Configuration data structures for Myelin.
//!
//! These types map directly to the JSON configuration files
//! (`config.<env>.json`). They are intentionally serde-friendly and include
//! defaults so that minimal configs remain concise. The snapshot is read once
//! at startup and never reloaded; every service object borrows it through an
//! `Arc<AppConfig>`.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const ENV_DEVELOPMENT: &str = "development";
pub const ENV_TESTING: &str = "testing";
pub const ENV_STAGING: &str = "staging";
pub const ENV_PRODUCTION: &str = "production";

pub const ENV_NAMES: [&str; 4] = [ENV_DEVELOPMENT, ENV_TESTING, ENV_STAGING, ENV_PRODUCTION];

/// Reverse-proxy dispatch configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream group specs:
    /// `scheme://host[:port]/prefix[?server=host2:port&rewrite=from:to]`.
    /// `server` and `rewrite` may repeat.
    pub upstreams: Vec<String>,
    /// HTTP status (as a string key, e.g. `"502"`) -> override value. A
    /// `*.html` value is served as a page (status 503); a `/...` value
    /// becomes a 303 redirect with the original URL in a `next` query
    /// parameter.
    pub override_status: HashMap<String, String>,
}

/// Listener, policy, and TLS settings for the HTTP front end.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpServerConfig {
    pub access_log: bool,
    /// Token refill rate per second, per client IP. Zero disables limiting.
    pub rate_limit: f64,
    pub rate_burst: u32,
    pub listen: String,
    pub listen_tls: String,
    pub auto_tls: bool,
    pub cert_hosts: Vec<String>,
    pub cert_dir: String,
    pub redirect_https: bool,
    pub redirect_www: bool,
    pub request_id: bool,

    /// Per-connection timeouts, in seconds. `read_header_timeout` falls back
    /// to `read_timeout` when zero.
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub idle_timeout: u64,
    pub read_header_timeout: u64,

    pub sys_metrics: bool,
    pub sys_api_key: String,
    pub listen_sys: String,

    pub allow_origins: Vec<String>,
    pub headers_del: Vec<String>,
    /// `"Name: value"` pairs appended to every response.
    pub headers_add: Vec<String>,
    /// Content-Security-Policy value, injected on HTML responses only.
    pub content_policy: String,

    /// Request body ceiling with K/M/G suffixes, e.g. `2M`, `2000K`, `1G`.
    /// Empty disables the limiter.
    pub body_limit: String,

    pub tls_session_cache: bool,
    pub tls_session_cache_size: usize,
    pub tls_session_tickets: bool,
    /// Humantime period between ticket key rotations.
    pub ticket_rotation_period: String,

    /// Drain deadline for graceful shutdown, in seconds.
    pub shutdown_timeout: u64,

    pub csrf: bool,
    /// Requests whose path matches this pattern are exempt from CSRF checks.
    pub csrf_skip_pattern: String,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            access_log: false,
            rate_limit: 5.0,
            rate_burst: 10,
            listen: "127.0.0.1:80".to_string(),
            listen_tls: "127.0.0.1:443".to_string(),
            auto_tls: false,
            cert_hosts: Vec::new(),
            cert_dir: String::new(),
            redirect_https: false,
            redirect_www: false,
            request_id: false,
            read_timeout: 5,
            write_timeout: 10,
            idle_timeout: 30,
            read_header_timeout: 0,
            sys_metrics: false,
            sys_api_key: String::new(),
            listen_sys: String::new(),
            allow_origins: Vec::new(),
            headers_del: Vec::new(),
            headers_add: Vec::new(),
            content_policy: String::new(),
            body_limit: "2M".to_string(),
            tls_session_cache: false,
            tls_session_cache_size: 128,
            tls_session_tickets: false,
            ticket_rotation_period: "24h".to_string(),
            shutdown_timeout: 10,
            csrf: true,
            csrf_skip_pattern: "/assets/".to_string(),
        }
    }
}

/// Country gating backed by an external resolver.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GeoIpConfig {
    /// Path to the resolver's database/table file.
    pub file: String,
    pub enabled: bool,
    /// When non-empty, only these ISO codes pass (takes precedence over the
    /// block list). Lowercase.
    pub allow_country: Vec<String>,
    /// When non-empty, these ISO codes are rejected. Lowercase.
    pub block_country: Vec<String>,
}

/// The immutable configuration snapshot.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    #[serde(skip)]
    pub name: String,
    pub env: String,
    #[serde(skip)]
    pub debug: bool,
    pub is_maint: bool,
    pub title: String,

    pub proxy: ProxyConfig,
    pub http_server: HttpServerConfig,
    pub geo_ip: GeoIpConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: crate::config::consts::APP_NAME.to_string(),
            env: ENV_PRODUCTION.to_string(),
            debug: false,
            is_maint: false,
            title: String::new(),
            proxy: ProxyConfig::default(),
            http_server: HttpServerConfig::default(),
            geo_ip: GeoIpConfig::default(),
        }
    }
}

impl AppConfig {
    /// Effective TLS session cache size (guards a zero from config).
    pub fn tls_session_cache_size(&self) -> usize {
        if self.http_server.tls_session_cache_size == 0 {
            128
        } else {
            self.http_server.tls_session_cache_size
        }
    }
}

/// Parse a human-readable byte size with an optional K/M/G suffix.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty size".to_string());
    }
    let (digits, multiplier) = match input.as_bytes()[input.len() - 1] {
        b'K' | b'k' => (&input[..input.len() - 1], 1024u64),
        b'M' | b'm' => (&input[..input.len() - 1], 1024 * 1024),
        b'G' | b'g' => (&input[..input.len() - 1], 1024 * 1024 * 1024),
        _ => (input, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|e| format!("invalid size '{input}': {e}"))
}
