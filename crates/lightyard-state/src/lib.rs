//! in-memory registries for lightyard.
//!
//! every registry here is an explicit object built on concurrency-safe maps
//! and injected into the scheduler service:
//! - [`ChallengeAuthenticator`]: single-use register/recover challenges
//! - [`NodeRegistry`]: one [`NodeRecord`] per registered node id
//! - [`WebhookRegistry`]: outgoing webhook registrations per node

mod challenges;
mod error;
mod node_registry;
mod process;
mod webhooks;

pub use challenges::ChallengeAuthenticator;
pub use error::Error;
pub use node_registry::{NodeEvent, NodeMetadata, NodeRecord, NodeRegistry, RegistrationClaim};
pub use process::{Endpoint, NodeProcess};
pub use webhooks::{WebhookRegistration, WebhookRegistry, WebhookSummary};

/// result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;
