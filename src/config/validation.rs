//! Startup validation for the configuration snapshot.
//!
//! Everything here is fatal: a snapshot that fails validation aborts startup
//! before any listener binds. Per-request recoverable conditions (malformed
//! rewrite rules, unresolvable countries) are deliberately not validated here.
use std::{net::SocketAddr, path::Path};

use regex::Regex;

use crate::config::models::{AppConfig, parse_size};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Configuration snapshot validator.
pub struct AppConfigValidator;

impl AppConfigValidator {
    /// Validate the entire snapshot, reporting every problem at once.
    pub fn validate(config: &AppConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();
        let http = &config.http_server;

        if http.listen.is_empty() && http.listen_tls.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "http_server.listen / http_server.listen_tls".to_string(),
            });
        }

        for (field, address) in [
            ("http_server.listen", &http.listen),
            ("http_server.listen_tls", &http.listen_tls),
            ("http_server.listen_sys", &http.listen_sys),
        ] {
            if !address.is_empty() {
                if let Err(e) = Self::validate_listen_address(address) {
                    errors.push(ValidationError::InvalidListenAddress {
                        address: address.clone(),
                        reason: format!("{field}: {e}"),
                    });
                }
            }
        }

        if !http.listen_tls.is_empty() {
            errors.extend(Self::validate_tls(config));
        }

        if !http.listen_sys.is_empty() && http.sys_api_key.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "http_server.sys_api_key".to_string(),
            });
        }

        for upstream in &config.proxy.upstreams {
            if let Err(e) = url::Url::parse(upstream) {
                errors.push(ValidationError::InvalidField {
                    field: format!("proxy.upstreams: {upstream}"),
                    message: e.to_string(),
                });
            }
        }

        if !http.body_limit.is_empty() {
            if let Err(e) = parse_size(&http.body_limit) {
                errors.push(ValidationError::InvalidField {
                    field: "http_server.body_limit".to_string(),
                    message: e,
                });
            }
        }

        if let Err(e) = humantime::parse_duration(&http.ticket_rotation_period) {
            errors.push(ValidationError::InvalidField {
                field: "http_server.ticket_rotation_period".to_string(),
                message: e.to_string(),
            });
        }

        if http.csrf {
            if let Err(e) = Regex::new(&http.csrf_skip_pattern) {
                errors.push(ValidationError::InvalidField {
                    field: "http_server.csrf_skip_pattern".to_string(),
                    message: e.to_string(),
                });
            }
        }

        if http.rate_limit < 0.0 {
            errors.push(ValidationError::InvalidField {
                field: "http_server.rate_limit".to_string(),
                message: "must not be negative".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: errors
                    .iter()
                    .map(|e| format!("  - {e}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
        }
    }

    fn validate_listen_address(address: &str) -> Result<(), String> {
        address
            .parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|_| "must be in 'IP:PORT' form (e.g. '127.0.0.1:8443')".to_string())
    }

    fn validate_tls(config: &AppConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let http = &config.http_server;

        if http.cert_dir.is_empty() {
            errors.push(ValidationError::InvalidTls {
                message: "cert_dir is required when listen_tls is set".to_string(),
            });
        } else if !Path::new(&http.cert_dir).is_dir() {
            errors.push(ValidationError::InvalidTls {
                message: format!("cert_dir does not exist: {}", http.cert_dir),
            });
        }

        if http.cert_hosts.is_empty() {
            errors.push(ValidationError::InvalidTls {
                message: "cert_hosts must name at least one host".to_string(),
            });
        }

        errors
    }
}
