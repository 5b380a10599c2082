//! error types for the lightyard server

use std::time::Duration;

use thiserror::Error;

/// errors surfaced by the scheduler, supervisor and pairing coordinator
#[derive(Debug, Error)]
pub enum Error {
    /// certificate issuance failed
    #[error(transparent)]
    Ca(#[from] lightyard_ca::Error),

    /// a registry rejected the operation
    #[error(transparent)]
    State(#[from] lightyard_state::Error),

    /// a request carried a malformed core value
    #[error(transparent)]
    Types(#[from] lightyard_types::Error),

    /// no node executable is known for the signer version
    #[error("no node executable for signer version {0:?}")]
    UnknownSignerVersion(String),

    /// the node process did not accept connections in time
    #[error("node {node_id} not reachable after {timeout:?}")]
    SchedulingTimeout {
        /// node being scheduled
        node_id: String,
        /// how long we waited
        timeout: Duration,
    },

    /// the node process exited before it became reachable
    #[error("node {node_id} exited during startup: {status}")]
    ProcessExited {
        /// node being scheduled
        node_id: String,
        /// exit status as reported by the os
        status: String,
    },

    /// a request field is malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// a pairing approval signature does not verify
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// the approving key belongs to no device of the node's account
    #[error("approver is not a device of node {0}")]
    UntrustedApprover(String),

    /// the server is stopping and no longer waits on nodes
    #[error("server is shutting down")]
    ShuttingDown,

    /// registration requires an invite code and none or a wrong one was given
    #[error("invalid invite code")]
    InvalidInviteCode,

    /// no pending pairing session with this device id
    #[error("pairing session {0} not found")]
    PairingSessionNotFound(String),

    /// the node's signer has no open request stream
    #[error("signer for node {0} is not connected")]
    SignerNotConnected(String),

    /// the signer declined the pairing
    #[error("pairing rejected: {0}")]
    PairingRejected(String),

    /// nobody approved the pairing in time
    #[error("pairing session {0} expired")]
    PairingExpired(String),

    /// the server's own state or configuration is inconsistent
    #[error("configuration error: {0}")]
    Configuration(String),

    /// filesystem or process io failed
    #[error("{context}: {source}")]
    Io {
        /// what we were doing
        context: String,
        /// underlying error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::io("background task failed", std::io::Error::other(e))
    }
}

/// result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;
