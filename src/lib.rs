//! Myelin - an edge HTTP(S) gateway.
//!
//! Myelin terminates client connections (plain and TLS, with optional ACME
//! certificate provisioning), runs every request through an ordered chain of
//! cross-cutting policy stages, and dispatches what survives to configured
//! upstream groups with round-robin balancing, bounded failover retry, and
//! literal path-prefix rewriting. It is the single point through which all
//! external traffic flows in front of one or more backend services.
//!
//! # Features
//! - Ordered, short-circuiting policy pipeline (maintenance gate, redirects,
//!   security headers, CSRF guard, body limit, CORS, rate limiting, GeoIP
//!   gating, request ids, access logging)
//! - Path-prefix upstream routing with per-group round-robin balancing and a
//!   bounded retry budget
//! - Literal prefix rewrite rules per upstream group
//! - Status overrides: substitute a static page or redirect for terminal
//!   errors
//! - TLS lifecycle: static certificates or ACME auto-certs, session cache,
//!   periodic session-ticket key rotation
//! - Independent plain/TLS/admin listeners with deadline-bounded graceful
//!   shutdown
//! - Prometheus-style metrics behind an API-key-gated admin endpoint
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters**
//! (implementations) while keeping policy and routing logic inside `core`.
//! Service objects are built once at startup from the immutable
//! configuration snapshot and injected into every worker; there is no hot
//! reload and no ambient global state.
//!
//! # Error Handling
//! Fallible APIs return `eyre::Result<T>` at the binary/adapter boundary and
//! domain error types (`GatewayError`, `HttpClientError`) inside the core.
pub mod admin;
pub mod config;
pub mod metrics;
pub mod ports;
pub mod server;
pub mod tls;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{
        CidrGeoResolver, EmbeddedPages, GatewayHandler, HttpClientAdapter, ProxyDispatcher,
        SysMount,
    },
    core::{Pipeline, StatusOverrides, UpstreamRouter},
    metrics::MetricsRegistry,
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
