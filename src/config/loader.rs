//! Configuration loading and layering.
//!
//! Precedence, lowest to highest: built-in defaults, `config.<env>.json`
//! files found in the configured search directories, `APP_*` environment
//! variables (with `APP_*_FILE` secret-file indirection), command-line flags.
//! The result is the immutable [`AppConfig`] snapshot.
use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result, eyre};

use crate::config::models::{AppConfig, ENV_DEVELOPMENT, ENV_NAMES, ENV_PRODUCTION};

/// Values captured from the command line. Empty string / empty vec / `false`
/// means "not given" and leaves the lower layers untouched.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// `;`-separated list of directories to search for config files.
    pub config: String,
    pub cert_dir: String,
    pub env: String,
    pub name: String,
    pub is_maint: bool,
    pub upstreams: Vec<String>,
    pub cert_hosts: Vec<String>,
    pub geo_ip_file: String,
    pub sys_api_key: String,
    pub listen: String,
    pub listen_tls: String,
    pub listen_sys: String,
}

/// Reads `APP_<NAME>` variables, falling back to the contents of the file
/// named by `APP_<NAME>_FILE` (how container secrets are usually mounted).
struct EnvReader {
    prefix: &'static str,
    error: Option<eyre::Report>,
}

impl EnvReader {
    fn new() -> Self {
        Self {
            prefix: "APP_",
            error: None,
        }
    }

    fn raw(&mut self, name: &str) -> Option<String> {
        let env_name = format!("{}{}", self.prefix, name).to_uppercase();
        if let Ok(value) = std::env::var(&env_name) {
            if !value.is_empty() {
                tracing::info!("reading {:?} value from env: {}", name, env_name);
                return Some(value);
            }
        }
        let file_var = format!("{env_name}_FILE");
        if let Ok(path) = std::env::var(&file_var) {
            if !path.is_empty() {
                tracing::info!("reading {:?} value from file: {} = {}", name, file_var, path);
                match std::fs::read_to_string(&path) {
                    Ok(data) => return Some(data.trim_end().to_string()),
                    Err(e) => self.error = Some(eyre!("cannot read {file_var}={path}: {e}")),
                }
            }
        }
        None
    }

    fn string(&mut self, slot: &mut String, name: &str, cmd: &str) {
        if !cmd.is_empty() {
            tracing::info!("reading {:?} value from cmd: {}", name, cmd);
            *slot = cmd.to_string();
            return;
        }
        if let Some(value) = self.raw(name) {
            *slot = value;
        }
    }

    /// Arrays are passed through the environment as JSON (`["a","b"]`).
    fn string_array(&mut self, slot: &mut Vec<String>, name: &str, cmd: &[String]) {
        if !cmd.is_empty() {
            tracing::info!("reading {:?} value from cmd: {:?}", name, cmd);
            *slot = cmd.to_vec();
            return;
        }
        if let Some(value) = self.raw(name) {
            match serde_json::from_str::<Vec<String>>(&value) {
                Ok(list) => {
                    if !list.is_empty() {
                        *slot = list;
                    }
                }
                Err(e) => self.error = Some(eyre!("cannot parse {name} as JSON array: {e}")),
            }
        }
    }

    fn boolean(&mut self, slot: &mut bool, name: &str, cmd: bool) {
        if cmd {
            tracing::info!("reading {:?} value from cmd: true", name);
            *slot = true;
            return;
        }
        if let Some(value) = self.raw(name) {
            *slot = value == "1" || value == "true";
        }
    }

    fn number<T>(&mut self, slot: &mut T, name: &str)
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.raw(name) {
            match value.parse::<T>() {
                Ok(parsed) => *slot = parsed,
                Err(e) => self.error = Some(eyre!("cannot parse {name}={value}: {e}")),
            }
        }
    }

    fn finish(self) -> Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Load the configuration snapshot. Fatal errors abort startup.
pub fn load(cli: &CliOverrides) -> Result<AppConfig> {
    let mut snapshot = AppConfig::default();

    // Resolve environment name first: it selects the config file name.
    let mut reader = EnvReader::new();
    reader.string(&mut snapshot.env, "env", &cli.env);
    reader.string(&mut snapshot.name, "name", &cli.name);
    reader.finish()?;

    if snapshot.env.is_empty() {
        snapshot.env = ENV_PRODUCTION.to_string();
    }
    snapshot.debug = snapshot.env == ENV_DEVELOPMENT;
    if !ENV_NAMES.contains(&snapshot.env.as_str()) {
        tracing::warn!("non-standard env name: {}", snapshot.env);
    }

    let env = snapshot.env.clone();
    let name = snapshot.name.clone();
    let debug = snapshot.debug;

    snapshot = load_files(&snapshot, cli)?;
    snapshot.env = env;
    snapshot.name = name;
    snapshot.debug = debug;

    apply_env_overrides(&mut snapshot)?;
    apply_cli_overrides(&mut snapshot, cli);

    tracing::info!(
        "config loaded: name={} env={} debug={}",
        snapshot.name,
        snapshot.env,
        snapshot.debug
    );

    Ok(snapshot)
}

/// Merge `config.<env>.json` from every search directory, later directories
/// overriding earlier ones. Missing files are skipped; unparsable files are
/// fatal.
fn load_files(snapshot: &AppConfig, cli: &CliOverrides) -> Result<AppConfig> {
    let search = format!(
        "{};{}",
        std::env::var("APP_CONFIG").unwrap_or_default(),
        cli.config
    );
    let file_name = format!("config.{}.json", snapshot.env);

    let mut builder = Config::builder();
    let mut found = 0usize;
    for dir in search.split(';').filter(|d| !d.is_empty()) {
        let path = Path::new(dir).join(&snapshot.name).join(&file_name);
        if !path.exists() {
            tracing::warn!("no config file at {}", path.display());
            continue;
        }
        tracing::info!("loading config from {}", path.display());
        let path_str = path
            .to_str()
            .ok_or_else(|| eyre!("invalid UTF-8 path: {}", path.display()))?;
        builder = builder.add_source(File::new(path_str, FileFormat::Json));
        found += 1;
    }

    if found == 0 {
        tracing::warn!("no config files found, using defaults and overrides");
        return Ok(snapshot.clone());
    }

    let settings = builder.build().context("failed to build config sources")?;
    settings
        .try_deserialize::<AppConfig>()
        .context("failed to deserialize config file(s)")
}

fn apply_env_overrides(snapshot: &mut AppConfig) -> Result<()> {
    let mut reader = EnvReader::new();
    let http = &mut snapshot.http_server;

    reader.boolean(&mut http.access_log, "http_access_log", false);
    reader.number(&mut http.rate_limit, "http_rate_limit");
    reader.number(&mut http.rate_burst, "http_rate_burst");
    reader.string(&mut http.listen, "http_listen", "");
    reader.string(&mut http.listen_tls, "http_listen_tls", "");
    reader.boolean(&mut http.auto_tls, "http_auto_tls", false);
    reader.boolean(&mut http.redirect_https, "http_redirect_https", false);
    reader.boolean(&mut http.redirect_www, "http_redirect_www", false);
    reader.boolean(&mut http.request_id, "http_request_id", false);
    reader.string(&mut http.cert_dir, "http_cert_dir", "");
    reader.number(&mut http.read_timeout, "http_read_timeout");
    reader.number(&mut http.write_timeout, "http_write_timeout");
    reader.number(&mut http.idle_timeout, "http_idle_timeout");
    reader.number(&mut http.read_header_timeout, "http_read_header_timeout");
    reader.number(&mut http.shutdown_timeout, "http_shutdown_timeout");
    reader.string(&mut http.listen_sys, "http_listen_sys", "");
    reader.string(&mut http.sys_api_key, "http_sys_api_key", "");
    reader.boolean(&mut http.sys_metrics, "http_sys_metrics", false);
    reader.string_array(&mut http.allow_origins, "allow_origins", &[]);
    reader.string_array(&mut http.headers_del, "headers_del", &[]);
    reader.string_array(&mut http.headers_add, "headers_add", &[]);
    reader.string(&mut http.content_policy, "content_policy", "");
    reader.string(&mut http.body_limit, "body_limit", "");
    reader.boolean(&mut http.tls_session_cache, "http_tls_session_cache", false);
    reader.number(&mut http.tls_session_cache_size, "http_tls_session_cache_size");
    reader.boolean(&mut http.tls_session_tickets, "http_tls_session_tickets", false);
    reader.string(
        &mut http.ticket_rotation_period,
        "http_ticket_rotation_period",
        "",
    );
    reader.boolean(&mut http.csrf, "http_csrf", false);

    reader.string(&mut snapshot.title, "title", "");
    reader.boolean(&mut snapshot.is_maint, "is_maint", false);
    reader.string_array(&mut snapshot.proxy.upstreams, "upstreams", &[]);
    reader.string(&mut snapshot.geo_ip.file, "geo_ip_file", "");
    reader.string_array(&mut snapshot.geo_ip.allow_country, "allow_country", &[]);
    reader.string_array(&mut snapshot.geo_ip.block_country, "block_country", &[]);
    reader.string_array(&mut snapshot.http_server.cert_hosts, "cert_hosts", &[]);

    reader.finish()
}

fn apply_cli_overrides(snapshot: &mut AppConfig, cli: &CliOverrides) {
    let http = &mut snapshot.http_server;
    let mut set = |slot: &mut String, value: &str| {
        if !value.is_empty() {
            *slot = value.to_string();
        }
    };
    set(&mut http.listen, &cli.listen);
    set(&mut http.listen_tls, &cli.listen_tls);
    set(&mut http.listen_sys, &cli.listen_sys);
    set(&mut http.sys_api_key, &cli.sys_api_key);
    set(&mut http.cert_dir, &cli.cert_dir);
    set(&mut snapshot.geo_ip.file, &cli.geo_ip_file);
    if cli.is_maint {
        snapshot.is_maint = true;
    }
    if !cli.upstreams.is_empty() {
        snapshot.proxy.upstreams = cli.upstreams.clone();
    }
    if !cli.cert_hosts.is_empty() {
        snapshot.http_server.cert_hosts = cli.cert_hosts.clone();
    }
}
