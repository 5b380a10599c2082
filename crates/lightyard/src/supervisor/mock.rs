//! in-process stand-in for a node process.

use std::io;

use async_trait::async_trait;
use lightyard_state::{Endpoint, NodeProcess};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::launcher::{LaunchSpec, NodeLauncher};

/// accepts and drops connections on the node's grpc port instead of running
/// a node, so clients can be exercised without a lightning build.
#[derive(Debug, Default)]
pub struct MockLauncher;

#[async_trait]
impl NodeLauncher for MockLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn NodeProcess>> {
        let listener = TcpListener::bind(("127.0.0.1", spec.endpoint.grpc_port)).await?;
        let node = spec.node_id.short_string();
        info!(node_id = %node, port = spec.endpoint.grpc_port, "started mock node");

        let task = tokio::spawn(async move {
            while let Ok((_, peer)) = listener.accept().await {
                debug!(node_id = %node, %peer, "mock node accepted connection");
            }
        });

        Ok(Box::new(MockProcess {
            task,
            endpoint: spec.endpoint.clone(),
        }))
    }
}

struct MockProcess {
    task: JoinHandle<()>,
    endpoint: Endpoint,
}

#[async_trait]
impl NodeProcess for MockProcess {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn is_alive(&mut self) -> bool {
        !self.task.is_finished()
    }

    async fn stop(&mut self) -> io::Result<()> {
        self.task.abort();
        // wait for the listener to be dropped so the port is free again
        let _ = (&mut self.task).await;
        Ok(())
    }
}

impl Drop for MockProcess {
    fn drop(&mut self) {
        self.task.abort();
    }
}
