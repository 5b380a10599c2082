//! the `serve` subcommand - runs the scheduler.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use color_eyre::eyre::{Context, Result, bail};
use lightyard_types::{Config, LauncherKind};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use super::{init_logging, load_config_file};
use crate::{AppState, create_app};

/// how long open connections get to finish after shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// run the lightyard scheduler
#[derive(Args, Debug)]
pub struct ServeCommand {
    /// path to config file (toml format)
    #[arg(short, long, env = "LIGHTYARD_CONFIG")]
    config: Option<PathBuf>,

    /// address to listen on
    #[arg(long, env = "LIGHTYARD_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// log level
    #[arg(long, env = "LIGHTYARD_LOG_LEVEL")]
    log_level: Option<String>,

    /// certificate hierarchy root
    #[arg(long, env = "LIGHTYARD_CERT_ROOT")]
    cert_root: Option<PathBuf>,

    /// parent directory of node working directories
    #[arg(long, env = "LIGHTYARD_NODE_DIRECTORY")]
    node_directory: Option<PathBuf>,

    /// host advertised in node grpc uris
    #[arg(long, env = "LIGHTYARD_NODE_HOST")]
    node_host: Option<String>,

    /// how nodes are started (process, mock)
    #[arg(long, env = "LIGHTYARD_LAUNCHER")]
    launcher: Option<String>,

    /// seconds a node gets to open its grpc port
    #[arg(long, env = "LIGHTYARD_STARTUP_TIMEOUT_SECS")]
    startup_timeout_secs: Option<u64>,

    /// signing subdaemon passed to every node
    #[arg(long, env = "LIGHTYARD_HSMD_PATH")]
    hsmd_path: Option<PathBuf>,

    /// ask each `lightningd` on the search path for its version
    #[arg(long, env = "LIGHTYARD_VERSIONS_SEARCH_PATH")]
    versions_search_path: Option<bool>,
}

impl ServeCommand {
    /// convert cli arguments into a config struct, merging with config file if present.
    ///
    /// priority order: defaults -> config file -> cli flags
    fn into_config(self) -> Result<Config> {
        let mut config = load_config_file(self.config.as_ref())?.unwrap_or_default();

        // cli overrides (only if explicitly set)
        if let Some(listen_addr) = self.listen_addr {
            config.listen_addr = listen_addr;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if let Some(cert_root) = self.cert_root {
            config.cert_root = cert_root;
        }
        if let Some(node_directory) = self.node_directory {
            config.node_directory = node_directory;
        }
        if let Some(node_host) = self.node_host {
            config.node_host = node_host;
        }
        if let Some(launcher) = self.launcher {
            config.scheduler.launcher = parse_launcher(&launcher)?;
        }
        if let Some(secs) = self.startup_timeout_secs {
            config.scheduler.startup_timeout_secs = secs;
        }
        if let Some(hsmd_path) = self.hsmd_path {
            config.scheduler.hsmd_path = Some(hsmd_path);
        }
        if let Some(scan) = self.versions_search_path {
            config.versions_search_path = scan;
        }

        Ok(config)
    }

    /// run the serve command
    pub async fn run(self) -> Result<()> {
        let config = self.into_config()?;
        init_logging(&config.log_level)?;

        info!("starting lightyard...");
        info!("listen address: {}", config.listen_addr);
        info!("certificate root: {:?}", config.cert_root);
        info!("node directory: {:?}", config.node_directory);

        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", config.listen_addr))?;

        std::fs::create_dir_all(&config.node_directory).with_context(|| {
            format!("failed to create node directory: {:?}", config.node_directory)
        })?;

        let state = AppState::new(config)
            .await
            .context("failed to initialize services")?;
        let app = create_app(state.clone());

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("starting http server on {}", addr);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::select! {
            result = &mut server => {
                result.context("server task failed")?.context("server error")?;
                return Ok(());
            }
            _ = shutdown_signal() => {}
        }

        // releases parked node_info waits, which would otherwise hold the drain
        state.scheduler.shutdown().await;
        let _ = stop_tx.send(());
        match tokio::time::timeout(DRAIN_TIMEOUT, server).await {
            Ok(result) => result.context("server task failed")?.context("server error")?,
            Err(_) => warn!("open connections did not finish in {:?}", DRAIN_TIMEOUT),
        }

        info!("lightyard stopped");
        Ok(())
    }
}

fn parse_launcher(s: &str) -> Result<LauncherKind> {
    match s.to_lowercase().as_str() {
        "process" => Ok(LauncherKind::Process),
        "mock" => Ok(LauncherKind::Mock),
        other => bail!("unknown launcher {other:?} (expected process or mock)"),
    }
}

/// resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => debug!("received ctrl-c"),
        _ = terminate => debug!("received SIGTERM"),
    }
    info!("shutting down");
}
