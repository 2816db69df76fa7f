pub mod access_log;
pub mod body_limit;
pub mod cors;
pub mod csrf;
pub mod geoip;
pub mod headers;
pub mod maintenance;
pub mod rate_limit;
pub mod redirect;
pub mod request_id;
