//! Main command: loads the pool-set configuration, brings up every pool,
//! optionally serves the checkout RPC, and drains everything on signal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::action::plugins::{register_builtin_plugins, Registry};
use crate::config::PoolSetConfig;
use crate::events::{noop, Emitter, TerminalEmitter};
use crate::pool_set::PoolSet;
use crate::runtime::docker::DockerRuntime;
use crate::runtime::ContainerRuntime;
use crate::server::{self, AppState};

pub struct RunOptions {
    pub config_path: String,
    pub port: Option<u16>,
    pub gui: bool,
}

/// Run the pool engine until a shutdown signal is received.
pub async fn run(opts: RunOptions) -> Result<()> {
    info!("Loading configuration from: {}", opts.config_path);
    let config = PoolSetConfig::load(&opts.config_path).context("failed to load pool-set configuration")?;
    info!("Configuration loaded: {} pool(s)", config.pools.len());

    let mut registry = Registry::new();
    register_builtin_plugins(&mut registry);

    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect().context("failed to connect to docker")?);

    let emitter: Arc<dyn Emitter> = if opts.gui { Arc::new(TerminalEmitter) } else { noop() };

    let pool_set = Arc::new(
        PoolSet::build(config, &registry, runtime, emitter).map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    info!("Waiting for all pools to reach target population...");
    pool_set.wait_ready().await;
    info!("All pools ready");

    let server_handle = axum_server::Handle::new();

    if let Some(port) = opts.port {
        let addr: SocketAddr = format!("0.0.0.0:{port}").parse().context("invalid bind address")?;
        let state = AppState { pool_set: pool_set.clone() };
        let handle = server_handle.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(addr, state, handle).await {
                warn!("Checkout server stopped with an error: {e}");
            }
        });
        info!("Checkout server listening on {addr}");
    } else {
        info!("No --port given, running headless (no checkout RPC server)");
    }

    wait_for_shutdown_signal().await;
    warn!("Received shutdown signal, draining pools...");

    pool_set.stop().await;
    server_handle.graceful_shutdown(Some(Duration::from_secs(10)));

    info!("All pools drained, exiting");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigquit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
