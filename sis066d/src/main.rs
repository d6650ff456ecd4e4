//! Daemon entry point: parse the CLI, load and merge configuration, bind
//! every listener, drop privileges, dial outbound peers, and run the accept
//! loops until a shutdown signal arrives.

mod app;
mod cli;
mod dts_conn;
mod passive_conn;
mod pidfile;
mod privilege;
mod routing;
mod sis_conn;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sis066_core::config::{self, Config, ListenEntry, PeerEntry};
use sis066_core::connection::ConnKind;
use sis066_core::listener::{ListenerSpec, PeerSpec, Proto};
use sis066_core::metrics::serve_prometheus_metrics;

use app::AppState;
use cli::Cli;
use pidfile::PidFile;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "sis066d exiting after fatal error");
            std::process::exit(1);
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn run(cli: Cli) -> sis066_core::Result<()> {
    let mut config = match &cli.config {
        Some(path) => config::load_from_path(path)?,
        None => Config::default(),
    };
    merge_cli_listeners(&mut config, &cli.listen);

    let state = Arc::new(AppState::new(&config)?);
    let listeners = bind_listeners(&config).await?;

    if let Some(uid_gid) = &cli.uid_gid {
        privilege::drop_privileges(uid_gid)?;
    }

    let pid_path = cli.pid_file.clone().or_else(|| config.pid_file.clone().map(Into::into));
    let pid_file = match &pid_path {
        Some(path) => Some(PidFile::write(path)?),
        None => None,
    };

    if let Some(port) = config.telemetry.metrics_port {
        let metrics = state.metrics.clone();
        tokio::spawn(async move {
            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
            if let Err(e) = serve_prometheus_metrics(addr, metrics).await {
                error!(error = %e, "metrics server stopped");
            }
        });
    }

    let shutdown = CancellationToken::new();
    for (proto, listener) in listeners {
        let state = state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(accept_loop(proto, listener, state, shutdown));
    }

    let peer_specs = outbound_peer_specs(&cli.peers, &config.peer);
    if !peer_specs.is_empty() {
        let state = state.clone();
        tokio::spawn(dial_outbound_peers(peer_specs, state));
    }

    wait_for_shutdown().await;
    info!("shutdown signal received, draining connections");
    shutdown.cancel();
    tokio::time::sleep(state.shutdown_timeout).await;

    if let Some(pid_file) = pid_file {
        pid_file.remove();
    }
    Ok(())
}

/// `-p`/`--listen` flags are additive to `[[listen]]` table entries, not a
/// replacement for them.
fn merge_cli_listeners(config: &mut Config, extra: &[ListenerSpec]) {
    for spec in extra {
        config.listen.push(ListenEntry {
            proto: spec.proto,
            iface: spec.addr.ip().to_string(),
            port: spec.addr.port(),
        });
    }
}

fn outbound_peer_specs(cli_peers: &[PeerSpec], config_peers: &[PeerEntry]) -> Vec<PeerSpec> {
    let mut specs: Vec<PeerSpec> = cli_peers.to_vec();
    specs.extend(config_peers.iter().map(|p| PeerSpec { host: p.host.clone(), port: p.port }));
    specs
}

async fn bind_listeners(config: &Config) -> sis066_core::Result<Vec<(Proto, TcpListener)>> {
    let mut bound = Vec::with_capacity(config.listen.len());
    for entry in &config.listen {
        let addr = format!("{}:{}", entry.iface, entry.port);
        let listener = bind_reusable(&addr).map_err(|e| {
            sis066_core::error::Sis066Error::Fatal(format!("failed to bind {entry.proto} listener on {addr}: {e}"))
        })?;
        info!(proto = %entry.proto, addr, "listener bound");
        bound.push((entry.proto, listener));
    }
    Ok(bound)
}

/// Bind a TCP listener with `SO_REUSEADDR` set, so a quick daemon restart
/// does not have to wait out the previous socket's `TIME_WAIT` state.
fn bind_reusable(addr: &str) -> std::io::Result<TcpListener> {
    use socket2::{Domain, Socket, Type};

    let sock_addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let domain = if sock_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&sock_addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

async fn accept_loop(proto: Proto, listener: TcpListener, state: Arc<AppState>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(proto = %proto, "accept loop stopping, shutdown in progress");
                return;
            }
            result = listener.accept() => match result {
                Ok((stream, peer_addr)) => {
                    let state = state.clone();
                    tokio::spawn(dispatch_connection(proto, stream, peer_addr, state));
                }
                Err(e) => {
                    warn!(proto = %proto, error = %e, "accept failed, continuing");
                }
            },
        }
    }
}

async fn dispatch_connection(
    proto: Proto,
    stream: tokio::net::TcpStream,
    peer_addr: std::net::SocketAddr,
    state: Arc<AppState>,
) {
    let _ = stream.set_nodelay(true);
    match ConnKind::from(proto) {
        ConnKind::Sis => sis_conn::run(stream, peer_addr, state).await,
        ConnKind::Dts => dts_conn::run(stream, peer_addr, state).await,
        ConnKind::Smtp | ConnKind::Http | ConnKind::TestPing => {
            passive_conn::run(stream, peer_addr, proto, state).await
        }
        ConnKind::Listen => unreachable!("listener sockets never reach dispatch"),
    }
}

async fn dial_outbound_peers(specs: Vec<PeerSpec>, state: Arc<AppState>) {
    for (stream, peer_addr) in sis066_core::peer::dial_all(&specs).await {
        let state = state.clone();
        tokio::spawn(dts_conn::run(stream, peer_addr, state));
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
