//! signer version to node executable resolution.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

/// maps the version string a signer reports to the node executable that
/// speaks its protocol.
pub trait VersionResolver: Send + Sync {
    /// executable for `signer_version`, if one is known.
    fn resolve(&self, signer_version: &str) -> Option<PathBuf>;
}

/// a fixed version table, optionally extended by probing `$PATH`.
#[derive(Debug, Clone, Default)]
pub struct VersionTable {
    versions: BTreeMap<String, PathBuf>,
}

impl VersionTable {
    pub fn new(versions: BTreeMap<String, PathBuf>) -> Self {
        Self { versions }
    }

    /// add every `lightningd` found on `$PATH` (and `$CLN_PATH`) under the
    /// version it reports. configured entries win over discovered ones.
    pub async fn scan_search_path(mut self) -> Self {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for var in ["PATH", "CLN_PATH"] {
            if let Some(value) = env::var_os(var) {
                dirs.extend(env::split_paths(&value));
            }
        }

        for dir in dirs {
            let candidate = dir.join("lightningd");
            if !candidate.is_file() {
                continue;
            }
            match query_version(&candidate).await {
                Some(version) => {
                    debug!(%version, path = ?candidate, "found node executable");
                    self.versions.entry(version).or_insert(candidate);
                }
                None => warn!(path = ?candidate, "failed to query node version"),
            }
        }

        info!(count = self.versions.len(), "node versions available");
        self
    }

    /// known versions.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }
}

impl VersionResolver for VersionTable {
    fn resolve(&self, signer_version: &str) -> Option<PathBuf> {
        self.versions.get(signer_version).cloned()
    }
}

async fn query_version(executable: &Path) -> Option<String> {
    let output = Command::new(executable)
        .arg("--version")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!version.is_empty()).then_some(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup() {
        let table = VersionTable::new(BTreeMap::from([(
            "v24.02".to_string(),
            PathBuf::from("/opt/cln/lightningd"),
        )]));
        assert_eq!(
            table.resolve("v24.02"),
            Some(PathBuf::from("/opt/cln/lightningd"))
        );
        assert_eq!(table.resolve("v0.10.1"), None);
        assert_eq!(table.versions().collect::<Vec<_>>(), vec!["v24.02"]);
    }

    #[tokio::test]
    async fn test_query_failure_is_none() {
        assert_eq!(query_version(Path::new("/nonexistent/lightningd")).await, None);
    }
}
