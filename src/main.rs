use std::{sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use myelin::{
    CidrGeoResolver, EmbeddedPages, GatewayHandler, HttpClientAdapter, MetricsRegistry, Pipeline,
    ProxyDispatcher, StatusOverrides, SysMount, UpstreamRouter,
    config::{self, AppConfigValidator, CliOverrides, models::ENV_DEVELOPMENT},
    ports::{GeoResolver, PageRenderer},
    server, tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// `;`-separated list of directories to search for config files
    #[clap(long)]
    config: Option<String>,

    /// Directory holding TLS certificates (or the ACME cache)
    #[clap(long)]
    cert_dir: Option<String>,

    /// Environment: development, testing, staging, production
    #[clap(long)]
    env: Option<String>,

    /// Application name (selects the config subdirectory)
    #[clap(long)]
    name: Option<String>,

    /// Maintenance mode: answer every request with 503
    #[clap(long)]
    is_maint: bool,

    /// Proxy upstream spec, repeatable:
    /// scheme://host[:port]/prefix[?server=...&rewrite=from:to]
    #[clap(long = "upstream")]
    upstreams: Vec<String>,

    /// TLS certificate host, repeatable
    #[clap(long = "cert-host")]
    cert_hosts: Vec<String>,

    /// Path to the geo country table file
    #[clap(long)]
    geo_ip_file: Option<String>,

    /// API key protecting the sys/metrics endpoint
    #[clap(long)]
    sys_api_key: Option<String>,

    /// Plain HTTP listen address
    #[clap(long)]
    listen: Option<String>,

    /// TLS listen address
    #[clap(long)]
    listen_tls: Option<String>,

    /// Admin/metrics listen address
    #[clap(long)]
    listen_sys: Option<String>,

    /// Print the effective configuration and exit
    #[clap(long)]
    dump_config: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config: self.config.clone().unwrap_or_default(),
            cert_dir: self.cert_dir.clone().unwrap_or_default(),
            env: self.env.clone().unwrap_or_default(),
            name: self.name.clone().unwrap_or_default(),
            is_maint: self.is_maint,
            upstreams: self.upstreams.clone(),
            cert_hosts: self.cert_hosts.clone(),
            geo_ip_file: self.geo_ip_file.clone().unwrap_or_default(),
            sys_api_key: self.sys_api_key.clone().unwrap_or_default(),
            listen: self.listen.clone().unwrap_or_default(),
            listen_tls: self.listen_tls.clone().unwrap_or_default(),
            listen_sys: self.listen_sys.clone().unwrap_or_default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    // Logging format is decided before config load so the loader's own
    // progress is visible.
    let debug = args.env.as_deref() == Some(ENV_DEVELOPMENT)
        || std::env::var("APP_ENV").is_ok_and(|v| v == ENV_DEVELOPMENT);
    tracing_setup::init_tracing(debug).map_err(|e| eyre!("failed to initialize tracing: {e}"))?;

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            This can happen if a provider was already installed.",
            e
        );
    }

    let config = config::load(&args.overrides()).context("failed to load configuration")?;
    AppConfigValidator::validate(&config).map_err(|e| eyre!("invalid configuration:\n{e}"))?;

    if args.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let config = Arc::new(config);
    let metrics = Arc::new(MetricsRegistry::new());
    let shutdown = Arc::new(GracefulShutdown::with_deadline(Duration::from_secs(
        config.http_server.shutdown_timeout.max(1),
    )));

    let signal_handler_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("signal handler error: {e}");
        }
    });

    let geo_resolver: Option<Arc<dyn GeoResolver>> = if config.geo_ip.enabled {
        let resolver = CidrGeoResolver::from_file(&config.geo_ip.file)
            .context("failed to load geo table")?;
        Some(Arc::new(resolver))
    } else {
        None
    };

    let pages: Arc<dyn PageRenderer> = Arc::new(EmbeddedPages::new());
    let pipeline = Pipeline::from_config(
        &config,
        geo_resolver,
        pages.clone(),
        shutdown.shutdown_token(),
    )
    .context("failed to build pipeline")?;

    let router = Arc::new(
        UpstreamRouter::from_specs(&config.proxy.upstreams)
            .context("failed to build upstream router")?,
    );
    if router.is_empty() {
        tracing::warn!("no upstreams configured, every unmatched request yields 404");
    }

    let http_client = Arc::new(HttpClientAdapter::new().context("failed to create HTTP client")?);
    let dispatcher = ProxyDispatcher::new(router, http_client, metrics.clone());
    let overrides = StatusOverrides::from_config(&config.proxy.override_status);

    let http = &config.http_server;
    let sys_mount = (!http.listen_sys.is_empty()
        && http.listen_sys == http.listen
        && http.sys_metrics)
        .then(|| SysMount {
            api_key: http.sys_api_key.clone(),
        });

    let handler = Arc::new(GatewayHandler::new(
        pipeline,
        dispatcher,
        overrides,
        pages,
        metrics.clone(),
        sys_mount,
    ));

    server::run(config, handler, metrics, shutdown).await
}
