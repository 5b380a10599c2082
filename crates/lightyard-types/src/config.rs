//! configuration types for lightyard

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// main configuration for lightyard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// address to bind the http server to.
    pub listen_addr: String,

    /// log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// root directory of the certificate hierarchy.
    pub cert_root: PathBuf,

    /// parent directory for per-node working directories.
    pub node_directory: PathBuf,

    /// host name advertised in node grpc uris.
    pub node_host: String,

    /// signer version -> node executable table.
    pub versions: BTreeMap<String, PathBuf>,

    /// also ask `lightningd --version` on the search path.
    pub versions_search_path: bool,

    /// node process scheduling options.
    pub scheduler: SchedulerConfig,

    /// register/recover authentication options.
    pub auth: AuthConfig,

    /// device pairing options.
    pub pairing: PairingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:2601".to_string(),
            log_level: "info".to_string(),
            cert_root: PathBuf::from("/var/lib/lightyard/certs"),
            node_directory: PathBuf::from("/var/lib/lightyard/nodes"),
            node_host: "localhost".to_string(),
            versions: BTreeMap::new(),
            versions_search_path: false,
            scheduler: SchedulerConfig::default(),
            auth: AuthConfig::default(),
            pairing: PairingConfig::default(),
        }
    }
}

/// how node processes are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    /// spawn the resolved node executable.
    Process,
    /// serve a tcp listener in-process instead of running a node.
    Mock,
}

/// node process scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// how long to wait for a started node to accept grpc connections.
    pub startup_timeout_secs: u64,

    /// interval between reachability checks.
    pub poll_interval_ms: u64,

    /// which launcher to use.
    pub launcher: LauncherKind,

    /// signing subdaemon passed to the node (`--subdaemon=hsmd:<path>`).
    pub hsmd_path: Option<PathBuf>,

    /// additional arguments appended to every node command line.
    pub extra_args: Vec<String>,
}

impl SchedulerConfig {
    /// startup timeout as a duration.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: 10,
            poll_interval_ms: 100,
            launcher: LauncherKind::Process,
            hsmd_path: None,
            extra_args: vec![],
        }
    }
}

/// register/recover authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// verify the signer's signature over the challenge nonce.
    pub verify_challenge_signatures: bool,

    /// invite codes accepted at registration. empty means no invite needed.
    pub invite_codes: Vec<String>,

    /// seconds an issued challenge stays valid.
    pub challenge_ttl_secs: u64,
}

impl AuthConfig {
    /// challenge lifetime as a duration.
    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            verify_challenge_signatures: true,
            invite_codes: vec![],
            challenge_ttl_secs: 300,
        }
    }
}

/// device pairing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// seconds a pending pairing session waits for approval.
    pub session_timeout_secs: u64,

    /// verify the attestation device's signature before relaying an approval.
    pub verify_approval_signatures: bool,
}

impl PairingConfig {
    /// session timeout as a duration.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 600,
            verify_approval_signatures: true,
        }
    }
}
