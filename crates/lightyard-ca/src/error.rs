//! error types for the certificate authority

use std::path::PathBuf;

use thiserror::Error;

/// errors that can occur while issuing or loading identities
#[derive(Debug, Error)]
pub enum Error {
    /// path is not a valid hierarchical identity path
    #[error("invalid identity path: {0}")]
    InvalidPath(String),

    /// no issued ca exists at or above the path
    #[error("no certificate authority found above {0}")]
    MissingCa(String),

    /// the csr could not be parsed or names no usable subject
    #[error("invalid certificate signing request: {0}")]
    InvalidCsr(String),

    /// a leaf already exists and the request did not allow reissuance
    #[error("identity {0} already issued")]
    AlreadyIssued(String),

    /// identity files are missing
    #[error("identity {0} has not been issued")]
    NotIssued(String),

    /// key generation or signing failed
    #[error("signing failed: {0}")]
    SigningFailure(String),

    /// filesystem error
    #[error("io error at {path:?}: {source}")]
    Io {
        /// file or directory involved
        path: PathBuf,
        /// underlying error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<rcgen::Error> for Error {
    fn from(e: rcgen::Error) -> Self {
        Self::SigningFailure(e.to_string())
    }
}
