//! the process handle a node record owns while its node is running.

use std::io;

use async_trait::async_trait;

/// where a running node accepts grpc connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// host advertised to clients.
    pub host: String,
    /// grpc port the node listens on.
    pub grpc_port: u16,
}

impl Endpoint {
    /// the uri handed to clients, `https://host:port`.
    pub fn grpc_uri(&self) -> String {
        format!("https://{}:{}", self.host, self.grpc_port)
    }
}

/// a started node process.
///
/// implemented by the supervisor's launchers; the registry only needs to
/// know whether the process is still alive and how to stop it.
#[async_trait]
pub trait NodeProcess: Send + Sync {
    /// the endpoint the process was started on.
    fn endpoint(&self) -> &Endpoint;

    /// os process id, if there is one.
    fn pid(&self) -> Option<u32>;

    /// whether the process is still running. reaps it if it has exited.
    fn is_alive(&mut self) -> bool;

    /// stop the process and any children it spawned.
    async fn stop(&mut self) -> io::Result<()>;
}
