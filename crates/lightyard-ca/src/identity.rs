//! issued identities loaded from the certificate tree.

use std::fs;
use std::path::Path;

use crate::{Error, IdentityPath};

/// one issued identity (ca or leaf) with all of its pem material.
///
/// identities are immutable once issued; reissuing a leaf produces a new
/// `Identity` rather than mutating an existing one.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    /// hierarchical path of the identity.
    pub path: IdentityPath,
    /// pkcs#8 pem private key.
    pub private_key: String,
    /// pem certificate of this identity alone.
    pub public_key: String,
    /// certificate followed by its parent's chain.
    pub cert_chain: String,
    /// pem certificate of the root ca.
    pub ca_root: String,
}

impl Identity {
    /// load an issued identity from the certificate tree rooted at `root`.
    pub fn load(root: &Path, path: &IdentityPath) -> Result<Self, Error> {
        let files = path.files(root);
        if !files.chain.exists() {
            return Err(Error::NotIssued(path.to_string()));
        }
        let ca_files = IdentityPath::root().files(root);

        Ok(Self {
            path: path.clone(),
            private_key: read(&files.key)?,
            public_key: read(&files.cert)?,
            cert_chain: read(&files.chain)?,
            ca_root: read(&ca_files.cert)?,
        })
    }
}

// the private key never ends up in logs
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("path", &self.path)
            .field("private_key", &"[redacted]")
            .finish_non_exhaustive()
    }
}

fn read(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}
