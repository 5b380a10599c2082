//! outgoing webhook registrations.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use lightyard_types::NodeId;
use rand::RngCore;
use tracing::info;

use crate::{Error, Result};

/// prefix of every webhook signing secret.
const SECRET_PREFIX: &str = "whsec_";

/// a webhook together with its signing secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRegistration {
    pub id: u64,
    pub node_id: NodeId,
    pub uri: String,
    pub secret: String,
}

/// what listing returns: registrations without their secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSummary {
    pub id: u64,
    pub uri: String,
}

/// webhooks by id.
#[derive(Debug)]
pub struct WebhookRegistry {
    hooks: DashMap<u64, WebhookRegistration>,
    next_id: AtomicU64,
}

impl Default for WebhookRegistry {
    fn default() -> Self {
        Self {
            hooks: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// register `uri` for `node_id` and return the new registration.
    pub fn add(&self, node_id: NodeId, uri: &str) -> Result<WebhookRegistration> {
        validate_uri(uri)?;
        let registration = WebhookRegistration {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            node_id,
            uri: uri.to_string(),
            secret: generate_secret(),
        };
        self.hooks.insert(registration.id, registration.clone());
        info!(node_id = %node_id.short_string(), id = registration.id, uri, "added webhook");
        Ok(registration)
    }

    /// webhooks of `node_id`, ordered by id.
    pub fn list(&self, node_id: &NodeId) -> Vec<WebhookSummary> {
        let mut hooks: Vec<WebhookSummary> = self
            .hooks
            .iter()
            .filter(|h| &h.node_id == node_id)
            .map(|h| WebhookSummary {
                id: h.id,
                uri: h.uri.clone(),
            })
            .collect();
        hooks.sort_by_key(|h| h.id);
        hooks
    }

    /// delete `ids`. all of them must belong to `node_id`, otherwise nothing
    /// is deleted.
    pub fn delete(&self, node_id: &NodeId, ids: &[u64]) -> Result<()> {
        for id in ids {
            self.owned(node_id, *id)?;
        }
        for id in ids {
            self.hooks.remove_if(id, |_, h| &h.node_id == node_id);
        }
        info!(node_id = %node_id.short_string(), count = ids.len(), "deleted webhooks");
        Ok(())
    }

    /// replace the secret of webhook `id` and return the new one.
    pub fn rotate_secret(&self, node_id: &NodeId, id: u64) -> Result<String> {
        let mut hook = self
            .hooks
            .get_mut(&id)
            .filter(|h| &h.node_id == node_id)
            .ok_or(Error::WebhookNotFound {
                node_id: *node_id,
                id,
            })?;
        hook.secret = generate_secret();
        info!(node_id = %node_id.short_string(), id, "rotated webhook secret");
        Ok(hook.secret.clone())
    }

    fn owned(&self, node_id: &NodeId, id: u64) -> Result<()> {
        match self.hooks.get(&id) {
            Some(h) if &h.node_id == node_id => Ok(()),
            _ => Err(Error::WebhookNotFound {
                node_id: *node_id,
                id,
            }),
        }
    }
}

fn validate_uri(uri: &str) -> Result<()> {
    let rest = uri
        .strip_prefix("https://")
        .or_else(|| uri.strip_prefix("http://"))
        .ok_or_else(|| Error::InvalidArgument(format!("webhook uri {uri:?} must be http(s)")))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(Error::InvalidArgument(format!(
            "webhook uri {uri:?} has no host"
        )));
    }
    Ok(())
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", STANDARD.encode(bytes))
}
