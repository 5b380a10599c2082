//! launching node processes.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lightyard_state::{Endpoint, NodeProcess};
use lightyard_types::{Network, NodeId};
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// how long a node gets to exit after SIGTERM before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// how often the process group is checked while it shuts down.
const STOP_POLL: Duration = Duration::from_millis(50);

/// everything needed to start one node.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub node_id: NodeId,
    pub executable: PathBuf,
    pub network: Network,
    /// node working directory (`--lightning-dir`).
    pub directory: PathBuf,
    /// directory holding the node's tls material.
    pub cert_dir: PathBuf,
    pub endpoint: Endpoint,
    /// peer-to-peer listen port.
    pub p2p_port: u16,
    /// signing subdaemon, if the node should use a custom one.
    pub hsmd_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl LaunchSpec {
    /// the node command line, without the executable.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--network={}", self.network),
            format!("--lightning-dir={}", self.directory.display()),
            format!("--grpc-port={}", self.endpoint.grpc_port),
            format!("--bind-addr=127.0.0.1:{}", self.p2p_port),
        ];
        if let Some(hsmd) = &self.hsmd_path {
            args.push(format!("--subdaemon=hsmd:{}", hsmd.display()));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// starts node processes.
#[async_trait]
pub trait NodeLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn NodeProcess>>;
}

/// spawns the node executable as a child process in its own process group.
#[derive(Debug, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl NodeLauncher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn NodeProcess>> {
        let mut command = Command::new(&spec.executable);
        command
            .args(spec.args())
            .env("LIGHTYARD_CERT_PATH", &spec.cert_dir)
            .current_dir(&spec.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let mut child = command.spawn()?;
        let pid = child.id();
        info!(
            node_id = %spec.node_id.short_string(),
            executable = ?spec.executable,
            ?pid,
            "spawned node process"
        );

        let tag = spec.node_id.short_string();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, tag.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, tag, "stderr"));
        }

        Ok(Box::new(ChildProcess {
            child,
            pid,
            endpoint: spec.endpoint.clone(),
            stopped: false,
        }))
    }
}

async fn forward_output<R>(reader: R, node: String, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(node = %node, stream, "{line}");
    }
}

/// a node running as a child process.
///
/// the node leads its own process group, and the group outlives the leader
/// when subdaemons or anything else it forked keep running. stopping always
/// targets the whole group, and so does dropping a handle that was never
/// stopped.
struct ChildProcess {
    child: Child,
    pid: Option<u32>,
    endpoint: Endpoint,
    stopped: bool,
}

impl ChildProcess {
    fn group(&self) -> Option<Pid> {
        self.pid.map(|pid| Pid::from_raw(pid as i32))
    }
}

#[async_trait]
impl NodeProcess for ChildProcess {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn stop(&mut self) -> io::Result<()> {
        let Some(group) = self.group().filter(|_| !self.stopped) else {
            return Ok(());
        };

        // signalled even when the leader is gone, its children may not be
        signal_group(group, Signal::SIGTERM);

        let deadline = Instant::now() + STOP_GRACE;
        let mut reaped = false;
        loop {
            if !reaped {
                if let Some(status) = self.child.try_wait()? {
                    debug!(pid = ?self.pid, %status, "node process exited");
                    reaped = true;
                }
            }
            if reaped && !group_alive(group) {
                self.stopped = true;
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL).await;
        }

        warn!(pid = ?self.pid, "node process group ignored SIGTERM, killing");
        signal_group(group, Signal::SIGKILL);
        self.stopped = true;
        if !reaped {
            self.child.wait().await?;
        }
        Ok(())
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // kill_on_drop only reaches the leader
        if let Some(group) = self.group().filter(|_| !self.stopped) {
            signal_group(group, Signal::SIGKILL);
        }
    }
}

/// signal every process in `group`. a group that is already gone is fine.
fn signal_group(group: Pid, signal: Signal) {
    match killpg(group, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => {
            warn!(pgid = group.as_raw(), ?signal, error = %e, "failed to signal node process group")
        }
    }
}

/// whether any process is left in `group`.
fn group_alive(group: Pid) -> bool {
    killpg(group, None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(hsmd: Option<&str>) -> LaunchSpec {
        LaunchSpec {
            node_id: NodeId::from_slice(&[0x02; 33]).unwrap(),
            executable: PathBuf::from("/opt/cln/lightningd"),
            network: Network::Regtest,
            directory: PathBuf::from("/var/lib/lightyard/nodes/02"),
            cert_dir: PathBuf::from("/var/lib/lightyard/nodes/02/certs"),
            endpoint: Endpoint {
                host: "localhost".to_string(),
                grpc_port: 9000,
            },
            p2p_port: 9001,
            hsmd_path: hsmd.map(PathBuf::from),
            extra_args: vec!["--log-level=debug".to_string()],
        }
    }

    #[test]
    fn test_command_line() {
        assert_eq!(
            spec(Some("/opt/vls/hsmd")).args(),
            vec![
                "--network=regtest",
                "--lightning-dir=/var/lib/lightyard/nodes/02",
                "--grpc-port=9000",
                "--bind-addr=127.0.0.1:9001",
                "--subdaemon=hsmd:/opt/vls/hsmd",
                "--log-level=debug",
            ]
        );
        assert!(
            !spec(None)
                .args()
                .iter()
                .any(|a| a.starts_with("--subdaemon"))
        );
    }
}
