//! device pairing.
//!
//! a new device submits a csr and gets back a pairing code. an already
//! trusted device reads the session with [`PairingCoordinator::get_pairing_data`]
//! and approves it; the approval is relayed to the node's signer over its
//! request stream. when the signer answers, the csr is signed under the
//! node's account and the certificate is delivered to the waiting device.
//!
//! a signer only gets a request stream after signing a fresh nonce with its
//! node key, and with approval signatures enabled the approving key must
//! belong to a device already issued under the node's account.
//!
//! two bounded channels bridge the signer's stream and the rpc handlers:
//! one per connected signer carrying approval requests out, and one shared
//! channel carrying the signers' answers back to a resolver task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use lightyard_ca::{CertificateAuthority, IssueMode};
use lightyard_types::{NONCE_LEN, NodeId, PairingConfig};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::service::account_path;
use crate::verify::{SignatureVerifier, approval_message, verify_approval};
use crate::{Error, Result};

/// approval requests buffered per signer before approvers are held up.
const SIGNER_QUEUE: usize = 16;

/// signer answers buffered before signers are held up.
const REPLY_QUEUE: usize = 64;

/// prefix of the pairing code shown to the user, usually as a qr code.
const PAIRING_CODE_PREFIX: &str = "lightyard-pairing:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairDeviceRequest {
    pub csr: String,
    pub device_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub restrictions: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairingDataRequest {
    pub device_id: String,
}

/// what an approver reviews before approving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingData {
    pub device_id: String,
    pub csr: String,
    pub device_name: String,
    pub description: String,
    pub restrictions: String,
}

/// an approval signed by a trusted device's p-256 key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovePairingRequest {
    pub device_id: String,
    pub node_id: NodeId,
    pub device_name: String,
    #[serde(default)]
    pub restrictions: String,
    /// unix seconds, part of the signed message.
    pub timestamp: u64,
    /// uncompressed sec1 public key of the approving device.
    #[serde(with = "hex::serde")]
    pub pubkey: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    /// rune the approver wants the new device to receive.
    #[serde(default)]
    pub rune: String,
}

/// what the signer is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub device_id: String,
    pub node_id: NodeId,
    pub device_name: String,
    pub description: String,
    pub restrictions: String,
    pub timestamp: u64,
    #[serde(with = "hex::serde")]
    pub pubkey: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    pub rune: String,
    pub csr: String,
}

/// the signer's answer to an [`ApprovalRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub device_id: String,
    pub approved: bool,
    /// rune minted by the signer, handed to the new device.
    #[serde(default)]
    pub rune: String,
    #[serde(default)]
    pub reason: String,
}

/// first frame on a signer stream: the nonce to sign with the node key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerChallenge {
    #[serde(with = "hex::serde")]
    pub challenge: Vec<u8>,
}

/// the signer's first frame back: a lightning signed-message signature over
/// the challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerAuth {
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

/// the credential a paired device ends up with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingOutcome {
    pub device_cert: String,
    pub node_id: NodeId,
    pub rune: String,
}

struct Session {
    data: PairingData,
    /// node whose signer the approval was relayed to.
    approver: Option<NodeId>,
    outcome: oneshot::Sender<Result<PairingOutcome>>,
}

struct SignerLink {
    id: u64,
    requests: mpsc::Sender<ApprovalRequest>,
}

struct Inner {
    ca: Arc<CertificateAuthority>,
    sessions: DashMap<String, Session>,
    signers: DashMap<NodeId, SignerLink>,
    next_link: AtomicU64,
}

/// pairing sessions and signer request streams.
pub struct PairingCoordinator {
    inner: Arc<Inner>,
    replies: mpsc::Sender<(NodeId, ApprovalResponse)>,
    verifier: Arc<dyn SignatureVerifier>,
    config: PairingConfig,
}

impl PairingCoordinator {
    /// create the coordinator and spawn its resolver task.
    ///
    /// must be called from within a tokio runtime. the task ends when the
    /// coordinator is dropped.
    pub fn new(
        ca: Arc<CertificateAuthority>,
        verifier: Arc<dyn SignatureVerifier>,
        config: PairingConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            ca,
            sessions: DashMap::new(),
            signers: DashMap::new(),
            next_link: AtomicU64::new(0),
        });
        let (replies, mut rx) = mpsc::channel::<(NodeId, ApprovalResponse)>(REPLY_QUEUE);

        let resolver = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some((node_id, reply)) = rx.recv().await {
                resolver.resolve(node_id, reply).await;
            }
            debug!("pairing resolver stopped");
        });

        Self {
            inner,
            replies,
            verifier,
            config,
        }
    }

    /// open a pairing session for a new device.
    pub fn pair_device(&self, req: PairDeviceRequest) -> Result<PendingPairing> {
        // the subject is rewritten on signing, so the common name is only a
        // placeholder here
        CertificateAuthority::csr_common_name(&req.csr)?;

        let device_id = random_device_id();
        let (tx, rx) = oneshot::channel();
        let data = PairingData {
            device_id: device_id.clone(),
            csr: req.csr,
            device_name: req.device_name,
            description: req.description,
            restrictions: req.restrictions,
        };
        self.inner.sessions.insert(
            device_id.clone(),
            Session {
                data,
                approver: None,
                outcome: tx,
            },
        );
        info!(%device_id, "opened pairing session");

        Ok(PendingPairing {
            code: format!("{PAIRING_CODE_PREFIX}{device_id}"),
            outcome: rx,
            timeout: self.config.session_timeout(),
            guard: SessionGuard {
                inner: Arc::clone(&self.inner),
                device_id: device_id.clone(),
            },
            device_id,
        })
    }

    /// the data a pending session was opened with.
    pub fn get_pairing_data(&self, device_id: &str) -> Result<PairingData> {
        self.inner
            .sessions
            .get(device_id)
            .map(|session| session.data.clone())
            .ok_or_else(|| Error::PairingSessionNotFound(device_id.to_string()))
    }

    /// check an approval and relay it to the node's signer.
    ///
    /// waits for room in the signer's queue. the session completes once the
    /// signer answers.
    pub async fn approve_pairing(&self, req: ApprovePairingRequest) -> Result<()> {
        if !self.inner.sessions.contains_key(&req.device_id) {
            return Err(Error::PairingSessionNotFound(req.device_id.clone()));
        }
        if self.config.verify_approval_signatures {
            self.check_approver(&req).await?;
        }

        let request = {
            let mut session = self
                .inner
                .sessions
                .get_mut(&req.device_id)
                .ok_or_else(|| Error::PairingSessionNotFound(req.device_id.clone()))?;
            if session.approver.is_some() {
                return Err(Error::InvalidArgument(format!(
                    "pairing session {} is already approved",
                    req.device_id
                )));
            }

            session.approver = Some(req.node_id);
            ApprovalRequest {
                device_id: req.device_id.clone(),
                node_id: req.node_id,
                device_name: req.device_name,
                description: session.data.description.clone(),
                restrictions: req.restrictions,
                timestamp: req.timestamp,
                pubkey: req.pubkey,
                signature: req.signature,
                rune: req.rune,
                csr: session.data.csr.clone(),
            }
        };

        let sender = self
            .inner
            .signers
            .get(&req.node_id)
            .map(|link| link.requests.clone());
        let relayed = match sender {
            Some(sender) => sender.send(request).await.is_ok(),
            None => false,
        };
        if !relayed {
            // let a later approval through once the signer is back
            if let Some(mut session) = self.inner.sessions.get_mut(&req.device_id) {
                session.approver = None;
            }
            return Err(Error::SignerNotConnected(req.node_id.to_string()));
        }

        info!(device_id = %req.device_id, node_id = %req.node_id.short_string(), "relayed pairing approval");
        Ok(())
    }

    /// the approval must be signed by a key that the node's account already
    /// holds a device certificate for.
    async fn check_approver(&self, req: &ApprovePairingRequest) -> Result<()> {
        let message = approval_message(
            &req.device_id,
            req.timestamp,
            &req.node_id,
            &req.device_name,
            &req.restrictions,
        );
        verify_approval(&req.pubkey, &message, &req.signature)?;

        let account = account_path(&req.node_id)?;
        let ca = Arc::clone(&self.inner.ca);
        let pubkey = req.pubkey.clone();
        let approver =
            tokio::task::spawn_blocking(move || ca.find_leaf_by_key(&account, &pubkey)).await??;
        match approver {
            Some(path) => {
                debug!(device_id = %req.device_id, approver = %path, "approval signed by known device");
                Ok(())
            }
            None => {
                warn!(device_id = %req.device_id, node_id = %req.node_id.short_string(), "approval signed by unknown key");
                Err(Error::UntrustedApprover(req.node_id.to_string()))
            }
        }
    }

    /// a fresh nonce for a signer to sign before attaching its stream.
    pub fn signer_challenge(&self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    /// attach a signer's request stream once `signature` proves it holds
    /// the node key for `challenge`. a newer connection for the same node
    /// replaces the older one; a failed attempt leaves the current one be.
    pub fn authenticate_signer(
        &self,
        node_id: NodeId,
        challenge: &[u8],
        signature: &[u8],
    ) -> Result<SignerConnection> {
        if !self.verifier.verify(&node_id, challenge, signature) {
            warn!(node_id = %node_id.short_string(), "signer failed authentication");
            return Err(Error::InvalidSignature(format!(
                "signer for node {node_id}"
            )));
        }
        Ok(self.connect_signer(node_id))
    }

    fn connect_signer(&self, node_id: NodeId) -> SignerConnection {
        let (tx, rx) = mpsc::channel(SIGNER_QUEUE);
        let id = self.inner.next_link.fetch_add(1, Ordering::Relaxed);
        if self
            .inner
            .signers
            .insert(node_id, SignerLink { id, requests: tx })
            .is_some()
        {
            debug!(node_id = %node_id.short_string(), "replaced signer connection");
        }
        info!(node_id = %node_id.short_string(), "signer connected");

        SignerConnection {
            node_id,
            requests: rx,
            replies: self.replies.clone(),
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// whether a signer stream is attached for the node.
    pub fn is_signer_connected(&self, node_id: &NodeId) -> bool {
        self.inner.signers.contains_key(node_id)
    }

    /// number of open sessions.
    pub fn pending_sessions(&self) -> usize {
        self.inner.sessions.len()
    }
}

impl Inner {
    async fn resolve(&self, node_id: NodeId, reply: ApprovalResponse) {
        let Some((device_id, session)) = self
            .sessions
            .remove_if(&reply.device_id, |_, s| s.approver == Some(node_id))
        else {
            warn!(
                device_id = %reply.device_id,
                node_id = %node_id.short_string(),
                "signer answered for unknown or unrelayed pairing session"
            );
            return;
        };

        let result = if reply.approved {
            self.sign(node_id, &device_id, session.data.csr)
                .await
                .map(|device_cert| PairingOutcome {
                    device_cert,
                    node_id,
                    rune: reply.rune,
                })
        } else {
            Err(Error::PairingRejected(if reply.reason.is_empty() {
                "declined by signer".to_string()
            } else {
                reply.reason
            }))
        };

        match &result {
            Ok(_) => info!(%device_id, node_id = %node_id.short_string(), "paired device"),
            Err(e) => warn!(%device_id, error = %e, "pairing failed"),
        }
        // the device may have given up waiting
        let _ = session.outcome.send(result);
    }

    async fn sign(&self, node_id: NodeId, device_id: &str, csr: String) -> Result<String> {
        let subject = account_path(&node_id)?.join(&format!("paired-{device_id}"))?;
        let ca = Arc::clone(&self.ca);
        let chain = tokio::task::spawn_blocking(move || {
            ca.issue_from_csr(&csr, IssueMode::Pairing { subject })
        })
        .await??;
        Ok(chain)
    }
}

/// a session waiting for approval. dropping it discards the session.
pub struct PendingPairing {
    pub device_id: String,
    /// shown to the user for the approving device to scan.
    pub code: String,
    outcome: oneshot::Receiver<Result<PairingOutcome>>,
    timeout: Duration,
    guard: SessionGuard,
}

impl PendingPairing {
    /// wait for the signer's answer, up to the session timeout.
    pub async fn outcome(self) -> Result<PairingOutcome> {
        let result = match tokio::time::timeout(self.timeout, self.outcome).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => Err(Error::PairingExpired(self.device_id.clone())),
        };
        drop(self.guard);
        result
    }
}

struct SessionGuard {
    inner: Arc<Inner>,
    device_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.inner.sessions.remove(&self.device_id).is_some() {
            debug!(device_id = %self.device_id, "discarded pairing session");
        }
    }
}

/// one signer's end of the relay.
pub struct SignerConnection {
    node_id: NodeId,
    requests: mpsc::Receiver<ApprovalRequest>,
    replies: mpsc::Sender<(NodeId, ApprovalResponse)>,
    inner: Arc<Inner>,
    id: u64,
}

impl SignerConnection {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// next approval to forward to the signer. `None` once a newer
    /// connection replaced this one.
    pub async fn next_request(&mut self) -> Option<ApprovalRequest> {
        self.requests.recv().await
    }

    /// hand the signer's answer to the resolver.
    pub async fn reply(&self, response: ApprovalResponse) {
        if self.replies.send((self.node_id, response)).await.is_err() {
            warn!(node_id = %self.node_id.short_string(), "pairing resolver is gone");
        }
    }
}

impl Drop for SignerConnection {
    fn drop(&mut self) {
        let id = self.id;
        if self
            .inner
            .signers
            .remove_if(&self.node_id, |_, link| link.id == id)
            .is_some()
        {
            info!(node_id = %self.node_id.short_string(), "signer disconnected");
        }
    }
}

fn random_device_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::{LightningMessageVerifier, lightning_message_digest};
    use rcgen::{CertificateParams, DnType, KeyPair, PKCS_ECDSA_P256_SHA256};
    use ring::rand::SystemRandom;
    use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair as _};
    use tempfile::TempDir;

    fn node_id() -> NodeId {
        let mut bytes = [0xaa; 33];
        bytes[0] = 0x02;
        NodeId::from_slice(&bytes).unwrap()
    }

    fn setup(config: PairingConfig) -> (TempDir, PairingCoordinator) {
        let dir = tempfile::tempdir().unwrap();
        let ca = Arc::new(CertificateAuthority::new(dir.path()));
        ca.ensure_hierarchy().unwrap();
        ca.create_ca(&account_path(&node_id()).unwrap()).unwrap();
        let verifier = Arc::new(LightningMessageVerifier::new());
        (dir, PairingCoordinator::new(ca, verifier, config))
    }

    fn unsigned() -> PairingConfig {
        PairingConfig {
            verify_approval_signatures: false,
            ..PairingConfig::default()
        }
    }

    fn csr_for(key: &KeyPair, common_name: &str) -> String {
        let mut params = CertificateParams::new(vec![]).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.serialize_request(key).unwrap().pem().unwrap()
    }

    fn request() -> PairDeviceRequest {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        PairDeviceRequest {
            csr: csr_for(&key, "pairing-placeholder"),
            device_name: "laptop".to_string(),
            description: "work laptop".to_string(),
            restrictions: "method^list".to_string(),
        }
    }

    fn approval(device_id: &str) -> ApprovePairingRequest {
        ApprovePairingRequest {
            device_id: device_id.to_string(),
            node_id: node_id(),
            device_name: "laptop".to_string(),
            restrictions: "method^list".to_string(),
            timestamp: 1_700_000_000,
            pubkey: vec![],
            signature: vec![],
            rune: String::new(),
        }
    }

    #[tokio::test]
    async fn test_pairing_data_matches_request() {
        let (_dir, pairing) = setup(unsigned());
        let req = request();
        let pending = pairing.pair_device(req.clone()).unwrap();
        assert!(pending.code.ends_with(&pending.device_id));

        let data = pairing.get_pairing_data(&pending.device_id).unwrap();
        assert_eq!(
            data,
            PairingData {
                device_id: pending.device_id.clone(),
                csr: req.csr,
                device_name: req.device_name,
                description: req.description,
                restrictions: req.restrictions,
            }
        );

        assert!(matches!(
            pairing.get_pairing_data("unknown"),
            Err(Error::PairingSessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_csr_is_rejected() {
        let (_dir, pairing) = setup(unsigned());
        let req = PairDeviceRequest {
            csr: "not a csr".to_string(),
            ..request()
        };
        assert!(matches!(
            pairing.pair_device(req),
            Err(Error::Ca(lightyard_ca::Error::InvalidCsr(_)))
        ));
        assert_eq!(pairing.pending_sessions(), 0);
    }

    #[tokio::test]
    async fn test_dropping_pending_discards_session() {
        let (_dir, pairing) = setup(unsigned());
        let pending = pairing.pair_device(request()).unwrap();
        let device_id = pending.device_id.clone();
        assert_eq!(pairing.pending_sessions(), 1);

        drop(pending);
        assert_eq!(pairing.pending_sessions(), 0);
        assert!(pairing.get_pairing_data(&device_id).is_err());
    }

    #[tokio::test]
    async fn test_session_expires() {
        let (_dir, pairing) = setup(PairingConfig {
            session_timeout_secs: 0,
            ..unsigned()
        });
        let pending = pairing.pair_device(request()).unwrap();
        assert!(matches!(
            pending.outcome().await,
            Err(Error::PairingExpired(_))
        ));
        assert_eq!(pairing.pending_sessions(), 0);
    }

    #[tokio::test]
    async fn test_approve_requires_connected_signer() {
        let (_dir, pairing) = setup(unsigned());
        let pending = pairing.pair_device(request()).unwrap();

        let result = pairing.approve_pairing(approval(&pending.device_id)).await;
        assert!(matches!(result, Err(Error::SignerNotConnected(_))));

        // the session is still approvable once the signer attaches
        let mut signer = pairing.connect_signer(node_id());
        pairing
            .approve_pairing(approval(&pending.device_id))
            .await
            .unwrap();
        assert!(signer.next_request().await.is_some());

        // but only once
        assert!(matches!(
            pairing.approve_pairing(approval(&pending.device_id)).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_approved_pairing_issues_certificate() {
        let (_dir, pairing) = setup(unsigned());
        let pending = pairing.pair_device(request()).unwrap();
        let device_id = pending.device_id.clone();
        let mut signer = pairing.connect_signer(node_id());
        assert!(pairing.is_signer_connected(&node_id()));

        let waiter = tokio::spawn(pending.outcome());
        pairing.approve_pairing(approval(&device_id)).await.unwrap();

        let relayed = signer.next_request().await.unwrap();
        assert_eq!(relayed.device_id, device_id);
        assert_eq!(relayed.description, "work laptop");
        assert_eq!(relayed.restrictions, "method^list");

        signer
            .reply(ApprovalResponse {
                device_id: device_id.clone(),
                approved: true,
                rune: "rune123".to_string(),
                reason: String::new(),
            })
            .await;

        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.node_id, node_id());
        assert_eq!(outcome.rune, "rune123");

        let (_, pem) = x509_parser::pem::parse_x509_pem(outcome.device_cert.as_bytes()).unwrap();
        let cert = pem.parse_x509().unwrap();
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .unwrap()
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(cn, format!("/users/{}/paired-{}", node_id().to_hex(), device_id));
        assert_eq!(pairing.pending_sessions(), 0);
    }

    #[tokio::test]
    async fn test_rejected_pairing() {
        let (_dir, pairing) = setup(unsigned());
        let pending = pairing.pair_device(request()).unwrap();
        let device_id = pending.device_id.clone();
        let mut signer = pairing.connect_signer(node_id());

        let waiter = tokio::spawn(pending.outcome());
        pairing.approve_pairing(approval(&device_id)).await.unwrap();
        signer.next_request().await.unwrap();
        signer
            .reply(ApprovalResponse {
                device_id,
                approved: false,
                rune: String::new(),
                reason: "not my laptop".to_string(),
            })
            .await;

        match waiter.await.unwrap() {
            Err(Error::PairingRejected(reason)) => assert_eq!(reason, "not my laptop"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_approval_signature_is_checked() {
        let (_dir, pairing) = setup(PairingConfig::default());
        let pending = pairing.pair_device(request()).unwrap();
        let _signer = pairing.connect_signer(node_id());

        let rng = SystemRandom::new();
        let device_key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let key = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_FIXED_SIGNING,
            &device_key.serialize_der(),
            &rng,
        )
        .unwrap();

        let mut req = approval(&pending.device_id);
        req.pubkey = key.public_key().as_ref().to_vec();
        let message = approval_message(
            &req.device_id,
            req.timestamp,
            &req.node_id,
            &req.device_name,
            &req.restrictions,
        );
        req.signature = key.sign(&rng, &message).unwrap().as_ref().to_vec();

        // a valid signature from a key the account never issued for
        assert!(matches!(
            pairing.approve_pairing(req.clone()).await,
            Err(Error::UntrustedApprover(_))
        ));

        // enroll the approving key as a device of the node
        let device_path = format!("/users/{}/phone", node_id().to_hex());
        pairing
            .inner
            .ca
            .issue_from_csr(&csr_for(&device_key, &device_path), IssueMode::Fresh)
            .unwrap();

        let mut forged = req.clone();
        forged.restrictions = String::new();
        assert!(matches!(
            pairing.approve_pairing(forged).await,
            Err(Error::InvalidSignature(_))
        ));

        pairing.approve_pairing(req).await.unwrap();
    }

    #[tokio::test]
    async fn test_signer_must_prove_node_key() {
        let (_dir, pairing) = setup(unsigned());
        let secp = secp256k1::Secp256k1::new();
        let secret = secp256k1::SecretKey::from_slice(&[7; 32]).unwrap();
        let public = secp256k1::PublicKey::from_secret_key(&secp, &secret);
        let node = NodeId::from_slice(&public.serialize()).unwrap();
        let sign = |message: &[u8]| {
            let digest = secp256k1::Message::from_digest(lightning_message_digest(message));
            secp.sign_ecdsa(&digest, &secret).serialize_compact().to_vec()
        };

        let challenge = pairing.signer_challenge();
        let mut signer = pairing
            .authenticate_signer(node, &challenge, &sign(&challenge))
            .unwrap();
        assert!(pairing.is_signer_connected(&node));

        // failed attempts neither attach nor displace the live stream
        let other = pairing.signer_challenge();
        assert_ne!(other, challenge);
        assert!(matches!(
            pairing.authenticate_signer(node, &other, &sign(&challenge)),
            Err(Error::InvalidSignature(_))
        ));
        assert!(matches!(
            pairing.authenticate_signer(node, &other, &[0u8; 64]),
            Err(Error::InvalidSignature(_))
        ));
        assert!(matches!(
            pairing.authenticate_signer(node_id(), &challenge, &sign(&challenge)),
            Err(Error::InvalidSignature(_))
        ));
        assert!(!pairing.is_signer_connected(&node_id()));

        let pending = pairing.pair_device(request()).unwrap();
        let req = ApprovePairingRequest {
            node_id: node,
            ..approval(&pending.device_id)
        };
        pairing.approve_pairing(req).await.unwrap();
        let relayed = signer.next_request().await.unwrap();
        assert_eq!(relayed.node_id, node);
    }

    #[tokio::test]
    async fn test_newer_signer_connection_replaces_older() {
        let (_dir, pairing) = setup(unsigned());
        let mut first = pairing.connect_signer(node_id());
        let second = pairing.connect_signer(node_id());

        // the replaced link's sender is gone
        assert!(first.next_request().await.is_none());
        drop(first);
        assert!(pairing.is_signer_connected(&node_id()));

        drop(second);
        assert!(!pairing.is_signer_connected(&node_id()));
    }
}
