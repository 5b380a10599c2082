//! filesystem-backed certificate authority for lightyard.
//!
//! every identity in the fleet lives at a hierarchical path such as
//! `/users/<node_id_hex>/device`. the path maps onto files below a root
//! directory:
//!
//! | path | certificate | private key | chain |
//! |---|---|---|---|
//! | `/` | `ca.pem` | `ca-key.pem` | `ca.crt` |
//! | `/users/abc/device` | `users/abc/device.pem` | `users/abc/device-key.pem` | `users/abc/device.crt` |
//!
//! node processes read these exact files when they boot, so the layout is
//! part of the external contract.

mod authority;
mod error;
mod identity;
mod path;

pub use authority::{CertificateAuthority, IssueMode};
pub use error::Error;
pub use identity::Identity;
pub use path::{IdentityFiles, IdentityPath};

/// result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;
