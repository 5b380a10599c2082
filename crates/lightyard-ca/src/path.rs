//! hierarchical identity paths and their file mapping.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::Error;

/// a validated hierarchical identity path such as `/users/02ab/device`.
///
/// segments are non-empty, never `.` or `..`, and only contain ascii
/// alphanumerics, `-`, `_` and `.`, so a path can never escape the
/// certificate root when mapped onto the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityPath(String);

/// the three files backing an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityFiles {
    /// pem certificate (`<name>.pem`).
    pub cert: PathBuf,
    /// pkcs#8 pem private key (`<name>-key.pem`).
    pub key: PathBuf,
    /// certificate followed by the parent's chain (`<name>.crt`).
    pub chain: PathBuf,
}

impl IdentityPath {
    /// the root of the hierarchy.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// parse and validate a path.
    pub fn parse(s: &str) -> Result<Self, Error> {
        if s == "/" {
            return Ok(Self::root());
        }
        let Some(rest) = s.strip_prefix('/') else {
            return Err(Error::InvalidPath(format!("{s}: must start with '/'")));
        };
        for segment in rest.split('/') {
            validate_segment(segment).map_err(|reason| Error::InvalidPath(format!("{s}: {reason}")))?;
        }
        Ok(Self(s.to_string()))
    }

    /// whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// the path as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// the path segments, empty for the root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// the immediate parent, `None` for the root.
    pub fn parent(&self) -> Option<IdentityPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// append a single segment.
    pub fn join(&self, segment: &str) -> Result<IdentityPath, Error> {
        validate_segment(segment)
            .map_err(|reason| Error::InvalidPath(format!("{}/{segment}: {reason}", self.0)))?;
        if self.is_root() {
            Ok(Self(format!("/{segment}")))
        } else {
            Ok(Self(format!("{}/{segment}", self.0)))
        }
    }

    /// whether `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &IdentityPath) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.0
            .strip_prefix(ancestor.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// map the path onto its files below `root`.
    pub fn files(&self, root: &Path) -> IdentityFiles {
        if self.is_root() {
            return IdentityFiles {
                cert: root.join("ca.pem"),
                key: root.join("ca-key.pem"),
                chain: root.join("ca.crt"),
            };
        }

        let relative = &self.0[1..];
        let (dirs, name) = relative.rsplit_once('/').unwrap_or(("", relative));
        let mut dir = root.to_path_buf();
        for d in dirs.split('/').filter(|d| !d.is_empty()) {
            dir.push(d);
        }
        IdentityFiles {
            cert: dir.join(format!("{name}.pem")),
            key: dir.join(format!("{name}-key.pem")),
            chain: dir.join(format!("{name}.crt")),
        }
    }
}

fn validate_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty segment");
    }
    if segment == "." || segment == ".." {
        return Err("relative segment");
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err("segment contains invalid characters");
    }
    Ok(())
}

impl fmt::Display for IdentityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IdentityPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
