//! node process supervision.
//!
//! a node is `NotScheduled` until [`NodeSupervisor::schedule`] starts its
//! process and the grpc port accepts connections, at which point the process
//! is installed on the record and every waiter is woken. a failed start
//! leaves the node unscheduled and the error is returned to the caller.

mod launcher;
mod mock;
mod versions;

pub use launcher::{LaunchSpec, NodeLauncher, ProcessLauncher};
pub use mock::MockLauncher;
pub use versions::{VersionResolver, VersionTable};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lightyard_state::{Endpoint, NodeProcess, NodeRecord};
use lightyard_types::{LauncherKind, SchedulerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// name of the tls directory inside a node's working directory.
pub const CERT_DIR: &str = "certs";

/// starts, stops and tracks node processes.
pub struct NodeSupervisor {
    resolver: Arc<dyn VersionResolver>,
    launcher: Arc<dyn NodeLauncher>,
    config: SchedulerConfig,
    node_host: String,
}

impl NodeSupervisor {
    pub fn new(
        resolver: Arc<dyn VersionResolver>,
        launcher: Arc<dyn NodeLauncher>,
        config: SchedulerConfig,
        node_host: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            launcher,
            config,
            node_host: node_host.into(),
        }
    }

    /// the launcher selected in configuration.
    pub fn launcher_for(kind: LauncherKind) -> Arc<dyn NodeLauncher> {
        match kind {
            LauncherKind::Process => Arc::new(ProcessLauncher),
            LauncherKind::Mock => Arc::new(MockLauncher),
        }
    }

    /// ensure the node behind `record` is running and return its endpoint.
    ///
    /// idempotent while the process is alive.
    pub async fn schedule(&self, record: &NodeRecord) -> Result<Endpoint> {
        let _lifecycle = record.lock_lifecycle().await;
        if let Some(endpoint) = record.endpoint() {
            debug!(node_id = %record.node_id().short_string(), "node already running");
            return Ok(endpoint);
        }

        let node_id = record.node_id();
        let metadata = record.metadata();
        let executable = self
            .resolver
            .resolve(&metadata.signer_version)
            .ok_or_else(|| Error::UnknownSignerVersion(metadata.signer_version.clone()))?;

        let cert_dir = materialize(record).await?;
        let grpc_port = allocate_port().await?;
        let p2p_port = allocate_port().await?;

        let spec = LaunchSpec {
            node_id,
            executable,
            network: metadata.network,
            directory: metadata.directory.clone(),
            cert_dir,
            endpoint: Endpoint {
                host: self.node_host.clone(),
                grpc_port,
            },
            p2p_port,
            hsmd_path: self.config.hsmd_path.clone(),
            extra_args: self.config.extra_args.clone(),
        };

        info!(node_id = %node_id.short_string(), grpc_port, "starting node");
        let mut process = self
            .launcher
            .launch(&spec)
            .await
            .map_err(|e| Error::io(format!("failed to start node {node_id}"), e))?;

        if let Err(e) = self.wait_reachable(&mut *process, &spec).await {
            warn!(node_id = %node_id.short_string(), error = %e, "node failed to start");
            if let Err(stop_err) = process.stop().await {
                warn!(node_id = %node_id.short_string(), error = %stop_err, "failed to stop node");
            }
            return Err(e);
        }

        Ok(record.install_process(process))
    }

    /// stop the node's process, if any. the node becomes unscheduled.
    pub async fn stop(&self, record: &NodeRecord) -> Result<()> {
        let _lifecycle = record.lock_lifecycle().await;
        self.stop_locked(record).await
    }

    /// stop then schedule.
    pub async fn restart(&self, record: &NodeRecord) -> Result<Endpoint> {
        {
            let _lifecycle = record.lock_lifecycle().await;
            self.stop_locked(record).await?;
        }
        self.schedule(record).await
    }

    async fn stop_locked(&self, record: &NodeRecord) -> Result<()> {
        let Some(mut process) = record.take_process() else {
            return Ok(());
        };
        let node_id = record.node_id();
        process
            .stop()
            .await
            .map_err(|e| Error::io(format!("failed to stop node {node_id}"), e))?;
        info!(node_id = %node_id.short_string(), "node stopped");
        Ok(())
    }

    /// poll the grpc port until it accepts a connection, the process dies or
    /// the startup timeout passes.
    async fn wait_reachable(&self, process: &mut dyn NodeProcess, spec: &LaunchSpec) -> Result<()> {
        let startup_timeout = self.config.startup_timeout();
        let poll_interval = self.config.poll_interval();
        let deadline = Instant::now() + startup_timeout;
        let addr = ("127.0.0.1", spec.endpoint.grpc_port);

        loop {
            if !process.is_alive() {
                return Err(Error::ProcessExited {
                    node_id: spec.node_id.to_string(),
                    status: "exited before accepting connections".to_string(),
                });
            }
            if let Ok(Ok(_)) = timeout(poll_interval, TcpStream::connect(addr)).await {
                debug!(node_id = %spec.node_id.short_string(), "node reachable");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::SchedulingTimeout {
                    node_id: spec.node_id.to_string(),
                    timeout: startup_timeout,
                });
            }
            sleep(poll_interval).await;
        }
    }
}

/// write the node's tls material, init message and startup messages into
/// its working directory. returns the tls directory.
async fn materialize(record: &NodeRecord) -> Result<PathBuf> {
    let metadata = record.metadata();
    let cert_dir = metadata.directory.join(CERT_DIR);
    tokio::fs::create_dir_all(&cert_dir)
        .await
        .map_err(|e| Error::io(format!("failed to create {cert_dir:?}"), e))?;

    let identity = &metadata.identity;
    write(&cert_dir.join("ca.pem"), identity.ca_root.as_bytes()).await?;
    write(&cert_dir.join("node.crt"), identity.cert_chain.as_bytes()).await?;
    write(&cert_dir.join("node-key.pem"), identity.private_key.as_bytes()).await?;

    write(&metadata.directory.join("init.msg"), &metadata.init_msg).await?;
    let startup = serde_json::to_vec_pretty(&metadata.startup_messages)
        .map_err(|e| Error::io("failed to encode startup messages", e.into()))?;
    write(&metadata.directory.join("startup_messages.json"), &startup).await?;

    Ok(cert_dir)
}

async fn write(path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| Error::io(format!("failed to write {path:?}"), e))
}

/// grab a free local port by binding port 0 and releasing it.
async fn allocate_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::io("failed to allocate port", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::io("failed to allocate port", e))?
        .port();
    Ok(port)
}
