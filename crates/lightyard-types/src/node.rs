//! node identity types.
//!
//! a node is identified by the compressed secp256k1 public key its signer
//! derives from the seed. the key is always carried as 33 raw bytes and
//! serialized as lowercase hex.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

/// length of a compressed secp256k1 public key.
const NODE_ID_LEN: usize = 33;

/// node id - the compressed public key of the node's signer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// create a node id from raw bytes, rejecting anything that is not 33 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let arr: [u8; NODE_ID_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidNodeId(format!(
                "expected {} bytes, got {}",
                NODE_ID_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// get the raw bytes of the node id.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// full lowercase hex encoding, as used in certificate paths.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// returns a short string representation for logging.
    pub fn short_string(&self) -> String {
        format!("{:02x}{:02x}{:02x}...", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short_string())
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidNodeId(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// bitcoin network a node is started on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// bitcoin mainnet.
    Bitcoin,
    /// testnet3.
    Testnet,
    /// signet.
    Signet,
    /// local regtest.
    Regtest,
}

impl Network {
    /// the value passed to the node's `--network` flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Bitcoin => "bitcoin",
            Network::Testnet => "testnet",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
            "testnet" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            other => Err(Error::UnknownNetwork(other.to_string())),
        }
    }
}

/// a request/response pair the signer answered during its own startup.
///
/// the node replays these to its signing subdaemon so it can come up before
/// the remote signer attaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupMessage {
    /// raw request bytes.
    #[serde(with = "hex::serde")]
    pub request: Vec<u8>,
    /// raw response bytes.
    #[serde(with = "hex::serde")]
    pub response: Vec<u8>,
}
