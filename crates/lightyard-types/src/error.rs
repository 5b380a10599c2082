//! error types for lightyard-types

use thiserror::Error;

/// errors that can occur while parsing lightyard types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// node id is not valid hex or has the wrong length
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    /// network name is not one we schedule nodes for
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    /// challenge scope is neither register nor recover
    #[error("unknown challenge scope: {0}")]
    UnknownScope(String),

    /// configuration error
    #[error("configuration error: {0}")]
    Config(String),
}
