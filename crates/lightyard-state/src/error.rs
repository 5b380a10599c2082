//! error types for the registries

use lightyard_types::{ChallengeScope, NodeId};
use thiserror::Error;

/// errors returned by the registries
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// no unused challenge matches node id, scope and nonce
    #[error("no matching {scope} challenge for node {node_id}")]
    ChallengeNotFound {
        /// node the challenge was presented for
        node_id: NodeId,
        /// scope the challenge was presented for
        scope: ChallengeScope,
    },

    /// the challenge signature does not verify against the node id
    #[error("challenge signature does not match node {0}")]
    InvalidSignature(NodeId),

    /// the node id is already registered, or a registration is in flight
    #[error("node {0} already exists")]
    NodeAlreadyExists(NodeId),

    /// the node id has never been registered
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// no webhook with this id belongs to the node
    #[error("webhook {id} not found for node {node_id}")]
    WebhookNotFound {
        /// owning node
        node_id: NodeId,
        /// requested webhook id
        id: u64,
    },

    /// a request field is malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
