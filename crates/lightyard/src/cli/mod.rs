//! cli subcommands for lightyard.
//!
//! - `lightyard serve` - run the scheduler
//! - `lightyard ca init` - create the certificate hierarchy
//! - `lightyard ca issue <path>` - issue a ca or leaf certificate

mod ca;
mod serve;

pub use ca::CaCommand;
pub use serve::ServeCommand;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use lightyard_types::Config;
use tracing::{Level, debug};
use tracing_subscriber::FmtSubscriber;

/// default config file search paths (in order of priority).
const CONFIG_SEARCH_PATHS: &[&str] = &[
    "/etc/lightyard/config.toml",
    "~/.config/lightyard/config.toml",
    "./config.toml",
];

/// lightyard - scheduler for remotely-signed lightning nodes
#[derive(Parser, Debug)]
#[command(name = "lightyard")]
#[command(about = "Scheduler for remotely-signed Lightning nodes", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// top-level commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// run the scheduler
    Serve(ServeCommand),

    /// manage the certificate hierarchy
    #[command(subcommand)]
    Ca(CaCommand),
}

/// find and load a config file, returning none if no config file is found.
///
/// an explicit path must exist; otherwise the search paths are tried in order.
pub(crate) fn load_config_file(config_path: Option<&PathBuf>) -> Result<Option<Config>> {
    if let Some(path) = config_path {
        return read_config(path).map(Some);
    }

    for path_str in CONFIG_SEARCH_PATHS {
        let path = search_path(path_str);
        if path.exists() {
            debug!("found config file at {:?}", path);
            return read_config(&path).map(Some);
        }
    }

    Ok(None)
}

/// a search path with `~` resolved, or unchanged when there is no home.
fn search_path(path_str: &str) -> PathBuf {
    expand_tilde::expand_tilde(path_str)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| PathBuf::from(path_str))
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config file: {:?}", path))
}

/// map a log level name to a tracing level, defaulting to info.
pub(crate) fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// install the global fmt subscriber.
pub(crate) fn init_logging(level: &str) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_log_level(level))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
