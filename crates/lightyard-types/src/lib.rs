//! core types for lightyard - a scheduler for remotely-signed lightning nodes.
//!
//! this crate provides the fundamental data structures used throughout lightyard:
//! - [`NodeId`]: the 33-byte public key identifying a node
//! - [`Network`]: the bitcoin network a node runs on
//! - [`ChallengeScope`]: what a challenge nonce authorizes
//! - [`Config`]: application configuration

mod challenge;
mod config;
mod error;
mod node;

pub use challenge::{ChallengeScope, NONCE_LEN};
pub use config::{AuthConfig, Config, LauncherKind, PairingConfig, SchedulerConfig};
pub use error::Error;
pub use node::{Network, NodeId, StartupMessage};

/// result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;
