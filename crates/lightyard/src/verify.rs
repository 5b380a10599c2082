//! signature checks for challenges and pairing approvals.
//!
//! signers answer a challenge by signing the nonce with their node key the
//! way lightning's `signmessage` does: ecdsa over secp256k1 on
//! `sha256(sha256("Lightning Signed Message:" || msg))`, sent as a 64-byte
//! compact signature. the node id is the compressed public key, so no
//! registration state is needed to verify.

use lightyard_types::NodeId;
use ring::signature::{ECDSA_P256_SHA256_FIXED, UnparsedPublicKey};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, VerifyOnly};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

const LIGHTNING_MESSAGE_PREFIX: &[u8] = b"Lightning Signed Message:";

/// checks a signer's signature over a challenge nonce.
pub trait SignatureVerifier: Send + Sync {
    /// whether `signature` is `node_id`'s signature over `message`.
    fn verify(&self, node_id: &NodeId, message: &[u8], signature: &[u8]) -> bool;
}

/// verifies lightning signed-message signatures.
pub struct LightningMessageVerifier {
    secp: Secp256k1<VerifyOnly>,
}

impl LightningMessageVerifier {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }
}

impl Default for LightningMessageVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier for LightningMessageVerifier {
    fn verify(&self, node_id: &NodeId, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_compact(signature) else {
            return false;
        };
        let Ok(pubkey) = PublicKey::from_slice(node_id.as_bytes()) else {
            return false;
        };
        let digest = Message::from_digest(lightning_message_digest(message));
        self.secp.verify_ecdsa(&digest, &signature, &pubkey).is_ok()
    }
}

/// accepts every signature. for test fleets whose signers cannot sign.
pub struct AcceptAll;

impl SignatureVerifier for AcceptAll {
    fn verify(&self, _node_id: &NodeId, _message: &[u8], _signature: &[u8]) -> bool {
        true
    }
}

/// `sha256d(prefix || message)`.
pub fn lightning_message_digest(message: &[u8]) -> [u8; 32] {
    let first = Sha256::new()
        .chain_update(LIGHTNING_MESSAGE_PREFIX)
        .chain_update(message)
        .finalize();
    Sha256::digest(first).into()
}

/// the bytes an attestation device signs when approving a pairing.
pub fn approval_message(
    device_id: &str,
    timestamp: u64,
    node_id: &NodeId,
    device_name: &str,
    restrictions: &str,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        device_id.len() + 8 + node_id.as_bytes().len() + device_name.len() + restrictions.len(),
    );
    buf.extend_from_slice(device_id.as_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(node_id.as_bytes());
    buf.extend_from_slice(device_name.as_bytes());
    buf.extend_from_slice(restrictions.as_bytes());
    buf
}

/// verify a p-256 approval signature (fixed-size `r || s`) by `pubkey`, an
/// uncompressed sec1 point.
pub fn verify_approval(pubkey: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, pubkey)
        .verify(message, signature)
        .map_err(|_| Error::InvalidSignature("pairing approval".to_string()))
}
