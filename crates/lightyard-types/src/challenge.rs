//! challenge scopes for the register/recover protocol.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// length of a challenge nonce in bytes.
///
/// signers refuse to sign challenges of any other length.
pub const NONCE_LEN: usize = 32;

/// what a challenge nonce may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeScope {
    /// first-time registration of a node id.
    Register,
    /// issuing new credentials for an already registered node id.
    Recover,
}

impl fmt::Display for ChallengeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeScope::Register => f.write_str("register"),
            ChallengeScope::Recover => f.write_str("recover"),
        }
    }
}

impl FromStr for ChallengeScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "register" => Ok(ChallengeScope::Register),
            "recover" => Ok(ChallengeScope::Recover),
            other => Err(Error::UnknownScope(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse_and_display() {
        for scope in [ChallengeScope::Register, ChallengeScope::Recover] {
            assert_eq!(scope.to_string().parse::<ChallengeScope>().unwrap(), scope);
        }
        assert!("pair".parse::<ChallengeScope>().is_err());
    }

    #[test]
    fn test_scope_serde_lowercase() {
        let json = serde_json::to_string(&ChallengeScope::Recover).unwrap();
        assert_eq!(json, "\"recover\"");
    }
}
