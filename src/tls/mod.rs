//! TLS lifecycle: certificate source, session cache, ticket rotation.
//!
//! Three modes: `Disabled` (no TLS listener), `StaticCert` (PEM pair loaded
//! from `cert_dir`, keyed by the first configured host), `AutoCert`
//! (ACME-backed issuance with a directory cache). Session resumption state
//! (server session cache, rotating ticket key) is independent of the cert
//! source and installed on whichever `ServerConfig` the mode produced.
use std::{fmt, io::BufReader, path::Path, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use eyre::{Context, Result, eyre};
use futures_util::StreamExt;
use rustls::{
    ServerConfig,
    crypto::aws_lc_rs,
    server::{ProducesTickets, ServerSessionMemoryCache},
};
use rustls_acme::{AcmeConfig, caches::DirCache};

use crate::{
    config::models::AppConfig,
    utils::graceful_shutdown::ShutdownToken,
};

/// Certificate source for the TLS listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Disabled,
    StaticCert,
    AutoCert,
}

pub fn mode(config: &AppConfig) -> TlsMode {
    if config.http_server.listen_tls.is_empty() {
        TlsMode::Disabled
    } else if config.http_server.auto_tls {
        TlsMode::AutoCert
    } else {
        TlsMode::StaticCert
    }
}

fn alpn_protocols() -> Vec<Vec<u8>> {
    vec![b"h2".to_vec(), b"http/1.1".to_vec()]
}

/// Build the rustls config for `StaticCert` mode. The cert/key pair lives at
/// `<cert_dir>/<first host>.crt|.key`; anything missing aborts startup.
pub fn static_server_config(config: &AppConfig) -> Result<ServerConfig> {
    let http = &config.http_server;
    if http.cert_dir.is_empty() {
        return Err(eyre!("certificate dir not defined"));
    }
    let host = http
        .cert_hosts
        .first()
        .ok_or_else(|| eyre!("certificate host not defined"))?;

    let dir = Path::new(&http.cert_dir);
    let cert_path = dir.join(format!("{host}.crt"));
    let key_path = dir.join(format!("{host}.key"));
    for path in [dir, cert_path.as_path(), key_path.as_path()] {
        if !path.exists() {
            return Err(eyre!("path not exists: {}", path.display()));
        }
        tracing::info!("cert path: {}", path.display());
    }

    let cert_file = std::fs::File::open(&cert_path)
        .with_context(|| format!("failed to open cert file {}", cert_path.display()))?;
    let key_file = std::fs::File::open(&key_path)
        .with_context(|| format!("failed to open key file {}", key_path.display()))?;

    let cert_chain = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate PEM")?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .context("failed to parse key PEM")?
        .ok_or_else(|| eyre!("no private key found in {}", key_path.display()))?;

    let mut server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .context("failed to build rustls server config")?;
    server_config.alpn_protocols = alpn_protocols();
    Ok(server_config)
}

/// Build the rustls config for `AutoCert` mode and start the background task
/// driving ACME order/renewal events. Debug mode targets the Let's Encrypt
/// staging directory.
pub fn auto_server_config(config: &AppConfig, mut shutdown: ShutdownToken) -> Result<ServerConfig> {
    let http = &config.http_server;
    if http.cert_dir.is_empty() {
        return Err(eyre!("certificate dir not defined"));
    }
    if http.cert_hosts.is_empty() {
        return Err(eyre!("certificate host not defined"));
    }
    if !Path::new(&http.cert_dir).exists() {
        return Err(eyre!("path not exists: {}", http.cert_dir));
    }

    tracing::info!(
        "auto TLS for hosts {:?}, cert cache: {}",
        http.cert_hosts,
        http.cert_dir
    );

    let mut state = AcmeConfig::new(http.cert_hosts.clone())
        .cache_option(Some(DirCache::new(http.cert_dir.clone())))
        .directory_lets_encrypt(!config.debug)
        .state();

    let resolver = state.resolver();

    // The state stream must be polled to drive issuance and renewal.
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = state.next() => match event {
                    Some(Ok(ok)) => tracing::info!("acme event: {ok:?}"),
                    Some(Err(e)) => tracing::error!("acme error: {e}"),
                    None => break,
                },
                _ = shutdown.wait_for_shutdown() => {
                    tracing::debug!("acme driver stopping");
                    break;
                }
            }
        }
    });

    let mut server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    let mut alpn = vec![rustls_acme::acme::ACME_TLS_ALPN_NAME.to_vec()];
    alpn.extend(alpn_protocols());
    server_config.alpn_protocols = alpn;
    Ok(server_config)
}

/// Install session resumption options on the listener config: an in-memory
/// session cache of bounded size and/or a periodically rotated ticket key.
pub fn apply_session_options(
    server_config: &mut ServerConfig,
    config: &AppConfig,
    shutdown: &ShutdownToken,
) -> Result<()> {
    let http = &config.http_server;

    if http.tls_session_cache {
        let size = config.tls_session_cache_size();
        server_config.session_storage = ServerSessionMemoryCache::new(size);
        tracing::info!("enabled TLS session cache: size: {size}");
    }

    if http.tls_session_tickets {
        let period = humantime::parse_duration(&http.ticket_rotation_period)
            .map_err(|e| eyre!("invalid ticket rotation period: {e}"))?;
        let ticketer = RotatingTicketer::new(period)?;
        ticketer.spawn_rotation(period, shutdown.clone());
        server_config.ticketer = ticketer;
        tracing::info!(
            "enabled TLS session tickets, rotation every {}",
            http.ticket_rotation_period
        );
    }

    Ok(())
}

/// Ticket encrypter whose key is replaced on a fixed period by a background
/// task. A failed key generation is logged and the previous key stays active
/// until the next tick.
pub struct RotatingTicketer {
    inner: ArcSwap<Arc<dyn ProducesTickets>>,
    lifetime_secs: u32,
}

impl RotatingTicketer {
    pub fn new(period: Duration) -> Result<Arc<Self>> {
        let initial = aws_lc_rs::Ticketer::new().context("failed to create initial ticketer")?;
        Ok(Arc::new(Self {
            inner: ArcSwap::from_pointee(initial),
            lifetime_secs: period.as_secs().min(u32::MAX as u64) as u32,
        }))
    }

    /// Generate and install a fresh key. Never fails hard: rotation is
    /// attempted again on the next tick.
    pub fn rotate(&self) {
        match aws_lc_rs::Ticketer::new() {
            Ok(fresh) => {
                self.inner.store(Arc::new(fresh));
                tracing::info!("session ticket key rotated");
            }
            Err(e) => {
                tracing::error!("failed to generate session ticket key: {e}");
            }
        }
    }

    pub fn spawn_rotation(self: &Arc<Self>, period: Duration, mut shutdown: ShutdownToken) {
        let ticketer = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // the install-time key covers the first period
            loop {
                tokio::select! {
                    _ = ticker.tick() => ticketer.rotate(),
                    _ = shutdown.wait_for_shutdown() => {
                        tracing::debug!("ticket rotation stopping");
                        break;
                    }
                }
            }
        });
    }
}

impl fmt::Debug for RotatingTicketer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingTicketer")
            .field("lifetime_secs", &self.lifetime_secs)
            .finish_non_exhaustive()
    }
}

impl ProducesTickets for RotatingTicketer {
    fn enabled(&self) -> bool {
        true
    }

    fn lifetime(&self) -> u32 {
        self.lifetime_secs
    }

    fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>> {
        self.inner.load().encrypt(plain)
    }

    fn decrypt(&self, cipher: &[u8]) -> Option<Vec<u8>> {
        self.inner.load().decrypt(cipher)
    }
}
