//! Listener lifecycle and shutdown control.
//!
//! Each configured listener (plain, TLS, admin) is an independent instance of
//! the `Idle -> Starting -> Running -> Draining -> Stopped` machine running
//! its own accept loop. Request processing happens on per-connection tasks;
//! the accept loop itself never blocks on a request. On the termination
//! signal every listener drains within the shared deadline and is force
//! closed when it misses it, which is logged but never fatal to process exit.
use std::{convert::Infallible, net::SocketAddr, sync::{Arc, Mutex}, time::Duration};

use eyre::{Context, Result, eyre};
use futures_util::StreamExt;
use hyper::service::service_fn;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
};
use tls_listener::TlsListener;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};

use crate::{
    adapters::GatewayHandler,
    admin::{self, AdminState},
    config::models::AppConfig,
    core::Scheme,
    metrics::MetricsRegistry,
    tls,
    utils::graceful_shutdown::{GracefulShutdown, ShutdownToken},
};

/// Per-listener lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Tracks and logs one listener's state transitions.
pub struct ListenerLifecycle {
    name: String,
    state: Mutex<ListenerState>,
}

impl ListenerLifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ListenerState::Idle),
        }
    }

    pub fn advance(&self, next: ListenerState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        tracing::info!(listener = %self.name, from = ?*state, to = ?next, "listener state");
        *state = next;
    }

    pub fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bind every configured listener, run them until the termination signal,
/// drain, and return once all of them stopped.
pub async fn run(
    config: Arc<AppConfig>,
    handler: Arc<GatewayHandler>,
    metrics: Arc<MetricsRegistry>,
    shutdown: Arc<GracefulShutdown>,
) -> Result<()> {
    let http = &config.http_server;
    let deadline = shutdown.drain_deadline();
    let mut tasks = Vec::new();

    if !http.listen.is_empty() {
        let listener = TcpListener::bind(http.listen.as_str())
            .await
            .with_context(|| format!("cannot bind {}", http.listen))?;
        tracing::info!("server starting: {}", http.listen);
        tasks.push(tokio::spawn(run_plain_listener(
            config.clone(),
            listener,
            handler.clone(),
            shutdown.shutdown_token(),
            deadline,
        )));
    }

    if tls::mode(&config) != tls::TlsMode::Disabled {
        let mut server_config = match tls::mode(&config) {
            tls::TlsMode::AutoCert => tls::auto_server_config(&config, shutdown.shutdown_token())?,
            tls::TlsMode::StaticCert => tls::static_server_config(&config)?,
            tls::TlsMode::Disabled => unreachable!(),
        };
        tls::apply_session_options(&mut server_config, &config, &shutdown.shutdown_token())?;

        let listener = TcpListener::bind(http.listen_tls.as_str())
            .await
            .with_context(|| format!("cannot bind {}", http.listen_tls))?;
        tracing::info!(
            "server starting: {} (TLS), cert from: {}",
            http.listen_tls,
            http.cert_dir
        );
        tasks.push(tokio::spawn(run_tls_listener(
            config.clone(),
            listener,
            server_config,
            handler.clone(),
            shutdown.shutdown_token(),
            deadline,
        )));
    }

    // A sys address equal to the main one means the scrape path is mounted on
    // the main pipeline instead.
    if !http.listen_sys.is_empty() && http.sys_metrics && http.listen_sys != http.listen {
        let listener = TcpListener::bind(http.listen_sys.as_str())
            .await
            .with_context(|| format!("cannot bind {}", http.listen_sys))?;
        tracing::info!("sys api server starting: {}", http.listen_sys);
        let state = Arc::new(AdminState {
            api_key: http.sys_api_key.clone(),
            metrics,
        });
        tasks.push(tokio::spawn(run_admin_listener(
            listener,
            admin::router(state),
            shutdown.shutdown_token(),
            deadline,
        )));
    } else if !http.listen_sys.is_empty() {
        tracing::warn!("sys api serves on the main listener: {}", http.listen);
    }

    if tasks.is_empty() {
        return Err(eyre!("no listener configured"));
    }

    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!("listener task failed: {e}");
        }
    }

    tracing::info!("bye");
    Ok(())
}

fn connection_builder(config: &AppConfig) -> auto::Builder<TokioExecutor> {
    let http = &config.http_server;
    let mut builder = auto::Builder::new(TokioExecutor::new());

    // The header read timeout also bounds keep-alive idle gaps between
    // requests on one connection.
    let header_timeout = if http.read_header_timeout > 0 {
        http.read_header_timeout
    } else {
        http.read_timeout
    };
    builder.http1().timer(TokioTimer::new());
    if header_timeout > 0 {
        builder
            .http1()
            .header_read_timeout(Duration::from_secs(header_timeout));
    }
    builder.http2().timer(TokioTimer::new());
    builder
}

fn request_budget(config: &AppConfig) -> Option<Duration> {
    let secs = config.http_server.write_timeout;
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn spawn_connection<I>(
    io: I,
    peer: SocketAddr,
    scheme: Scheme,
    handler: Arc<GatewayHandler>,
    builder: &auto::Builder<TokioExecutor>,
    graceful: &hyper_util::server::graceful::GracefulShutdown,
    budget: Option<Duration>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
        let handler = handler.clone();
        async move {
            let req = req.map(axum::body::Body::new);
            let response = match budget {
                Some(budget) => {
                    match tokio::time::timeout(budget, handler.handle_request(req, Some(peer), scheme))
                        .await
                    {
                        Ok(response) => response,
                        Err(_) => {
                            tracing::warn!(%peer, "request exceeded the response budget");
                            hyper::Response::builder()
                                .status(hyper::StatusCode::GATEWAY_TIMEOUT)
                                .body(axum::body::Body::from("504 Gateway Timeout"))
                                .unwrap_or_else(|_| hyper::Response::new(axum::body::Body::empty()))
                        }
                    }
                }
                None => handler.handle_request(req, Some(peer), scheme).await,
            };
            Ok::<_, Infallible>(response)
        }
    });

    let connection = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    let connection = graceful.watch(connection.into_owned());
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(%peer, "connection error: {e}");
        }
    });
}

async fn run_plain_listener(
    config: Arc<AppConfig>,
    listener: TcpListener,
    handler: Arc<GatewayHandler>,
    mut shutdown: ShutdownToken,
    deadline: Duration,
) {
    let lifecycle = ListenerLifecycle::new(format!("http {}", config.http_server.listen));
    lifecycle.advance(ListenerState::Starting);

    let builder = connection_builder(&config);
    let budget = request_budget(&config);
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    lifecycle.advance(ListenerState::Running);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    spawn_connection(
                        stream,
                        peer,
                        Scheme::Http,
                        handler.clone(),
                        &builder,
                        &graceful,
                        budget,
                    );
                }
                Err(e) => tracing::debug!("accept error: {e}"),
            },
            _ = shutdown.wait_for_shutdown() => break,
        }
    }

    drop(listener);
    lifecycle.advance(ListenerState::Draining);
    drain(graceful, deadline, "http").await;
    lifecycle.advance(ListenerState::Stopped);
}

async fn run_tls_listener(
    config: Arc<AppConfig>,
    listener: TcpListener,
    server_config: rustls::ServerConfig,
    handler: Arc<GatewayHandler>,
    mut shutdown: ShutdownToken,
    deadline: Duration,
) {
    let lifecycle = ListenerLifecycle::new(format!("https {}", config.http_server.listen_tls));
    lifecycle.advance(ListenerState::Starting);

    let builder = connection_builder(&config);
    let budget = request_budget(&config);
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();

    // Handshakes run concurrently inside the TlsListener, off the accept path.
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));
    let mut tls_listener = TlsListener::new(acceptor, listener);
    lifecycle.advance(ListenerState::Running);

    loop {
        tokio::select! {
            accepted = tls_listener.next() => match accepted {
                Some(Ok((stream, peer))) => {
                    spawn_connection(
                        stream,
                        peer,
                        Scheme::Https,
                        handler.clone(),
                        &builder,
                        &graceful,
                        budget,
                    );
                }
                Some(Err(e)) => tracing::debug!("TLS accept error: {e}"),
                None => break,
            },
            _ = shutdown.wait_for_shutdown() => break,
        }
    }

    drop(tls_listener);
    lifecycle.advance(ListenerState::Draining);
    drain(graceful, deadline, "https").await;
    lifecycle.advance(ListenerState::Stopped);
}

async fn run_admin_listener(
    listener: TcpListener,
    router: axum::Router,
    shutdown: ShutdownToken,
    deadline: Duration,
) {
    let lifecycle = ListenerLifecycle::new("sys");
    lifecycle.advance(ListenerState::Starting);

    let mut signal_token = shutdown.clone();
    let serve = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            signal_token.wait_for_shutdown().await;
        });
    lifecycle.advance(ListenerState::Running);

    let mut drain_token = shutdown;
    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                tracing::error!("sys api server error: {e}");
            }
        }
        _ = async {
            drain_token.wait_for_shutdown().await;
            lifecycle.advance(ListenerState::Draining);
            tokio::time::sleep(deadline).await;
        } => {
            tracing::error!("sys listener missed the {deadline:?} drain deadline, forcing close");
        }
    }
    lifecycle.advance(ListenerState::Stopped);
}

async fn drain(
    graceful: hyper_util::server::graceful::GracefulShutdown,
    deadline: Duration,
    name: &str,
) {
    tokio::select! {
        _ = graceful.shutdown() => {
            tracing::info!("{name} listener drained");
        }
        _ = tokio::time::sleep(deadline) => {
            tracing::error!("{name} listener missed the {deadline:?} drain deadline, forcing close");
        }
    }
}
