//! the scheduler service.
//!
//! [`SchedulerService`] composes the certificate authority, the registries
//! and the node supervisor into the register/recover/schedule protocol. it
//! is transport agnostic; the http handlers only decode requests and encode
//! what comes back.

use std::path::PathBuf;
use std::sync::Arc;

use lightyard_ca::{CertificateAuthority, Identity, IdentityPath, IssueMode};
use lightyard_state::{
    ChallengeAuthenticator, NodeMetadata, NodeRecord, NodeRegistry, WebhookRegistry,
};
use lightyard_types::{AuthConfig, ChallengeScope, Network, NodeId, StartupMessage};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::supervisor::NodeSupervisor;
use crate::verify::SignatureVerifier;
use crate::{Error, Result};

/// leaf name of a node's own identity below its account ca.
const NODE_LEAF: &str = "node";

/// leaf name of the server-generated device identity.
const DEVICE_LEAF: &str = "device";

#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub node_id: NodeId,
    pub scope: ChallengeScope,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeResponse {
    #[serde(with = "hex::serde")]
    pub challenge: Vec<u8>,
}

/// first-time registration of a node.
///
/// the device either sends a csr whose common name is a path below
/// `/users/<node_id>`, or no csr, in which case the server generates the
/// device key and returns it.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub node_id: NodeId,
    /// bip32 xpub of the signer, sent by clients that cannot make a csr.
    #[serde(default, with = "hex::serde")]
    pub bip32_key: Vec<u8>,
    pub network: Network,
    #[serde(with = "hex::serde")]
    pub challenge: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    pub signer_version: String,
    #[serde(default, with = "hex::serde")]
    pub init_msg: Vec<u8>,
    #[serde(default)]
    pub csr: Option<String>,
    #[serde(default)]
    pub invite_code: Option<String>,
    #[serde(default)]
    pub startup_msgs: Vec<StartupMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub node_id: NodeId,
    #[serde(with = "hex::serde")]
    pub challenge: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    #[serde(default)]
    pub csr: Option<String>,
}

/// a device credential. `device_key` is only set when the server generated
/// the key.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceCredential {
    pub device_cert: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub node_id: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeInfoRequest {
    pub node_id: NodeId,
    #[serde(default)]
    pub wait: bool,
}

/// where a node can be reached. `grpc_uri` is empty while unscheduled.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeInfoResponse {
    pub node_id: NodeId,
    pub grpc_uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddWebhookRequest {
    pub node_id: NodeId,
    pub uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddWebhookResponse {
    pub id: u64,
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListWebhooksRequest {
    pub node_id: NodeId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Webhook {
    pub id: u64,
    pub uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListWebhooksResponse {
    pub webhooks: Vec<Webhook>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteWebhooksRequest {
    pub node_id: NodeId,
    pub webhook_ids: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RotateSecretRequest {
    pub node_id: NodeId,
    pub webhook_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RotateSecretResponse {
    pub secret: String,
}

/// register, recover, schedule and webhook operations.
pub struct SchedulerService {
    ca: Arc<CertificateAuthority>,
    challenges: ChallengeAuthenticator,
    nodes: NodeRegistry,
    webhooks: WebhookRegistry,
    supervisor: NodeSupervisor,
    verifier: Arc<dyn SignatureVerifier>,
    node_directory: PathBuf,
    auth: AuthConfig,
    /// flips once on shutdown, releasing parked node_info waits.
    shutting_down: watch::Sender<bool>,
}

impl SchedulerService {
    pub fn new(
        ca: Arc<CertificateAuthority>,
        supervisor: NodeSupervisor,
        verifier: Arc<dyn SignatureVerifier>,
        node_directory: impl Into<PathBuf>,
        auth: AuthConfig,
    ) -> Self {
        Self {
            ca,
            challenges: ChallengeAuthenticator::with_ttl(auth.challenge_ttl()),
            nodes: NodeRegistry::new(),
            webhooks: WebhookRegistry::new(),
            supervisor,
            verifier,
            node_directory: node_directory.into(),
            auth,
            shutting_down: watch::Sender::new(false),
        }
    }

    /// the certificate authority devices are issued from.
    pub fn ca(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    /// look up a registered node.
    pub fn node(&self, node_id: &NodeId) -> Result<Arc<NodeRecord>> {
        Ok(self.nodes.lookup(node_id)?)
    }

    pub fn get_challenge(&self, req: ChallengeRequest) -> ChallengeResponse {
        let nonce = self.challenges.get_challenge(req.node_id, req.scope);
        ChallengeResponse {
            challenge: nonce.to_vec(),
        }
    }

    /// register a new node and issue its first device credential.
    pub async fn register(&self, req: RegisterRequest) -> Result<DeviceCredential> {
        let node_id = req.node_id;
        if req.csr.is_none() && req.bip32_key.is_empty() {
            return Err(Error::InvalidArgument(
                "either csr or bip32_key is required".to_string(),
            ));
        }
        let account = account_path(&node_id)?;
        if let Some(csr) = &req.csr {
            check_csr_subject(csr, &account)?;
        }

        self.check_invite(req.invite_code.as_deref())?;
        self.consume_challenge(node_id, ChallengeScope::Register, &req.challenge, &req.signature)?;

        // held until commit, so a concurrent register for the same node
        // fails here rather than racing on the filesystem
        let claim = self.nodes.claim(node_id)?;

        let directory = self.node_directory.join(node_id.to_hex());
        let exists = tokio::fs::try_exists(&directory)
            .await
            .map_err(|e| Error::io(format!("failed to inspect {directory:?}"), e))?;
        if exists {
            return Err(Error::Configuration(format!(
                "node directory {directory:?} exists for an unregistered node"
            )));
        }

        let ca = Arc::clone(&self.ca);
        let csr = req.csr;
        let (node_identity, credential) = tokio::task::spawn_blocking(move || -> Result<_> {
            ca.create_ca(&account)?;
            let node_identity = ca.issue_leaf(&account.join(NODE_LEAF)?)?;
            let credential = match csr {
                Some(csr) => DeviceCredential {
                    device_cert: ca.issue_from_csr(&csr, IssueMode::Fresh)?,
                    device_key: None,
                },
                None => server_generated(ca.issue_leaf(&account.join(DEVICE_LEAF)?)?),
            };
            Ok((node_identity, credential))
        })
        .await??;

        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| Error::io(format!("failed to create {directory:?}"), e))?;

        claim.commit(NodeMetadata {
            signer_version: req.signer_version,
            network: req.network,
            directory,
            identity: node_identity,
            init_msg: req.init_msg,
            startup_messages: req.startup_msgs,
        });

        info!(
            node_id = %node_id.short_string(),
            network = %req.network,
            csr = credential.device_key.is_none(),
            "registered node"
        );
        Ok(credential)
    }

    /// issue a new device credential for an already registered node.
    ///
    /// a csr replaces the leaf it names. without one, a fresh server
    /// generated leaf is issued at the next unused `recover-<n>` path.
    pub async fn recover(&self, req: RecoveryRequest) -> Result<DeviceCredential> {
        let node_id = req.node_id;
        let account = account_path(&node_id)?;
        if let Some(csr) = &req.csr {
            check_csr_subject(csr, &account)?;
        }
        self.consume_challenge(node_id, ChallengeScope::Recover, &req.challenge, &req.signature)?;
        let record = self.nodes.lookup(&node_id)?;

        let ca = Arc::clone(&self.ca);
        let credential = tokio::task::spawn_blocking(move || -> Result<DeviceCredential> {
            if let Some(csr) = req.csr {
                return Ok(DeviceCredential {
                    device_cert: ca.issue_from_csr(&csr, IssueMode::Recover)?,
                    device_key: None,
                });
            }
            loop {
                let path = account.join(&format!("recover-{}", record.next_recovery()))?;
                if ca.files(&path).chain.exists() {
                    continue;
                }
                return Ok(server_generated(ca.issue_leaf(&path)?));
            }
        })
        .await??;

        info!(node_id = %node_id.short_string(), "recovered node");
        Ok(credential)
    }

    /// make sure the node is running and return where to reach it.
    pub async fn schedule(&self, req: ScheduleRequest) -> Result<NodeInfoResponse> {
        let record = self.nodes.lookup(&req.node_id)?;
        let endpoint = self.supervisor.schedule(&record).await?;
        Ok(NodeInfoResponse {
            node_id: req.node_id,
            grpc_uri: endpoint.grpc_uri(),
        })
    }

    /// where the node runs. with `wait` this parks until a schedule for the
    /// node completes; otherwise the uri is empty while unscheduled.
    pub async fn get_node_info(&self, req: NodeInfoRequest) -> Result<NodeInfoResponse> {
        let record = self.nodes.lookup(&req.node_id)?;
        let grpc_uri = if req.wait {
            debug!(node_id = %req.node_id.short_string(), "waiting for node to be scheduled");
            let mut shutting_down = self.shutting_down.subscribe();
            tokio::select! {
                endpoint = record.wait_scheduled() => endpoint.grpc_uri(),
                _ = shutting_down.wait_for(|down| *down) => return Err(Error::ShuttingDown),
            }
        } else {
            record
                .endpoint()
                .map(|endpoint| endpoint.grpc_uri())
                .unwrap_or_default()
        };
        Ok(NodeInfoResponse {
            node_id: req.node_id,
            grpc_uri,
        })
    }

    /// stop the node's process. the node stays registered.
    pub async fn stop(&self, req: ScheduleRequest) -> Result<()> {
        let record = self.nodes.lookup(&req.node_id)?;
        self.supervisor.stop(&record).await
    }

    pub async fn restart(&self, req: ScheduleRequest) -> Result<NodeInfoResponse> {
        let record = self.nodes.lookup(&req.node_id)?;
        let endpoint = self.supervisor.restart(&record).await?;
        Ok(NodeInfoResponse {
            node_id: req.node_id,
            grpc_uri: endpoint.grpc_uri(),
        })
    }

    /// stop every running node. node_info waits in progress or started
    /// afterwards fail with [`Error::ShuttingDown`].
    pub async fn shutdown(&self) {
        self.shutting_down.send_replace(true);
        let records = self.nodes.records();
        info!(nodes = records.len(), "stopping all nodes");
        for record in records {
            if let Err(e) = self.supervisor.stop(&record).await {
                warn!(node_id = %record.node_id().short_string(), error = %e, "failed to stop node");
            }
        }
    }

    pub fn add_webhook(&self, req: AddWebhookRequest) -> Result<AddWebhookResponse> {
        self.nodes.lookup(&req.node_id)?;
        let hook = self.webhooks.add(req.node_id, &req.uri)?;
        Ok(AddWebhookResponse {
            id: hook.id,
            secret: hook.secret,
        })
    }

    pub fn list_webhooks(&self, req: ListWebhooksRequest) -> Result<ListWebhooksResponse> {
        self.nodes.lookup(&req.node_id)?;
        let webhooks = self
            .webhooks
            .list(&req.node_id)
            .into_iter()
            .map(|hook| Webhook {
                id: hook.id,
                uri: hook.uri,
            })
            .collect();
        Ok(ListWebhooksResponse { webhooks })
    }

    pub fn delete_webhooks(&self, req: DeleteWebhooksRequest) -> Result<()> {
        self.nodes.lookup(&req.node_id)?;
        self.webhooks.delete(&req.node_id, &req.webhook_ids)?;
        Ok(())
    }

    pub fn rotate_webhook_secret(&self, req: RotateSecretRequest) -> Result<RotateSecretResponse> {
        self.nodes.lookup(&req.node_id)?;
        let secret = self.webhooks.rotate_secret(&req.node_id, req.webhook_id)?;
        Ok(RotateSecretResponse { secret })
    }

    fn check_invite(&self, code: Option<&str>) -> Result<()> {
        if self.auth.invite_codes.is_empty() {
            return Ok(());
        }
        match code {
            Some(code) if self.auth.invite_codes.iter().any(|c| c == code) => Ok(()),
            _ => Err(Error::InvalidInviteCode),
        }
    }

    fn consume_challenge(
        &self,
        node_id: NodeId,
        scope: ChallengeScope,
        challenge: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let verifier = &self.verifier;
        self.challenges.consume(node_id, scope, challenge, |nonce| {
            verifier.verify(&node_id, nonce, signature)
        })?;
        Ok(())
    }
}

/// `/users/<node_id>`, the ca every credential of a node is issued under.
pub fn account_path(node_id: &NodeId) -> Result<IdentityPath> {
    Ok(IdentityPath::root().join("users")?.join(&node_id.to_hex())?)
}

/// a device csr must name a path below the node's account and must not
/// claim the node's own identity.
fn check_csr_subject(csr: &str, account: &IdentityPath) -> Result<()> {
    let subject = CertificateAuthority::csr_subject(csr)?;
    if !subject.is_descendant_of(account) || subject == account.join(NODE_LEAF)? {
        return Err(Error::InvalidArgument(format!(
            "csr subject {subject} is not a device path below {account}"
        )));
    }
    Ok(())
}

fn server_generated(identity: Identity) -> DeviceCredential {
    DeviceCredential {
        device_cert: identity.cert_chain,
        device_key: Some(identity.private_key),
    }
}
