//! single-use challenges for the register/recover protocol.
//!
//! a challenge moves from issued to used exactly once. presenting a nonce
//! that is unknown, already used, issued for another scope or issued for
//! another node all fail the same way, so callers learn nothing about which
//! part was wrong.
//!
//! challenges expire after a fixed lifetime. expired and used entries are
//! pruned as new ones are issued, and nodes left with nothing outstanding
//! are dropped from the map.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lightyard_types::{ChallengeScope, NONCE_LEN, NodeId};
use rand::RngCore;
use tracing::debug;

use crate::{Error, Result};

/// upper bound on live challenges per node. only reached by a caller
/// issuing faster than challenges expire; the oldest is dropped then.
const MAX_PENDING_PER_NODE: usize = 64;

/// default challenge lifetime.
const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);

/// every this many issued challenges the whole map is swept.
const SWEEP_INTERVAL: u64 = 1024;

#[derive(Debug, Clone)]
struct Challenge {
    scope: ChallengeScope,
    nonce: [u8; NONCE_LEN],
    used: bool,
    issued_at: Instant,
}

impl Challenge {
    fn is_live(&self, ttl: Duration) -> bool {
        !self.used && self.issued_at.elapsed() < ttl
    }
}

/// issues and consumes challenges.
#[derive(Debug)]
pub struct ChallengeAuthenticator {
    challenges: DashMap<NodeId, Vec<Challenge>>,
    ttl: Duration,
    issued: AtomicU64,
}

impl Default for ChallengeAuthenticator {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_CHALLENGE_TTL)
    }
}

impl ChallengeAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// an authenticator whose challenges expire after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            challenges: DashMap::new(),
            ttl,
            issued: AtomicU64::new(0),
        }
    }

    /// issue a fresh random nonce for `node_id` and `scope`.
    pub fn get_challenge(&self, node_id: NodeId, scope: ChallengeScope) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        {
            let mut entry = self.challenges.entry(node_id).or_default();
            entry.retain(|c| c.is_live(self.ttl));
            if entry.len() >= MAX_PENDING_PER_NODE {
                // oldest first, so the front is the stalest
                entry.remove(0);
            }
            entry.push(Challenge {
                scope,
                nonce,
                used: false,
                issued_at: Instant::now(),
            });
        }

        debug!(node_id = %node_id.short_string(), %scope, "issued challenge");
        if self.issued.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.sweep();
        }
        nonce
    }

    /// drop expired and used challenges for every node.
    pub fn sweep(&self) {
        let ttl = self.ttl;
        self.challenges.retain(|_, list| {
            list.retain(|c| c.is_live(ttl));
            !list.is_empty()
        });
    }

    /// consume the first unused challenge matching `node_id`, `scope` and
    /// `nonce`.
    ///
    /// `verify` checks the signature over the nonce; the challenge is only
    /// marked used when it returns true, so a bad signature does not burn a
    /// challenge.
    pub fn consume<F>(
        &self,
        node_id: NodeId,
        scope: ChallengeScope,
        nonce: &[u8],
        verify: F,
    ) -> Result<()>
    where
        F: FnOnce(&[u8; NONCE_LEN]) -> bool,
    {
        let not_found = || Error::ChallengeNotFound { node_id, scope };

        {
            let mut entry = self.challenges.get_mut(&node_id).ok_or_else(not_found)?;
            let ttl = self.ttl;
            let challenge = entry
                .iter_mut()
                .find(|c| c.is_live(ttl) && c.scope == scope && c.nonce.as_slice() == nonce)
                .ok_or_else(not_found)?;

            if !verify(&challenge.nonce) {
                return Err(Error::InvalidSignature(node_id));
            }
            challenge.used = true;

            debug!(
                node_id = %node_id.short_string(),
                %scope,
                age_ms = challenge.issued_at.elapsed().as_millis() as u64,
                "consumed challenge"
            );
            entry.retain(|c| c.is_live(ttl));
        }
        self.challenges.remove_if(&node_id, |_, list| list.is_empty());
        Ok(())
    }

    /// number of live challenges outstanding for `node_id`.
    pub fn pending(&self, node_id: &NodeId) -> usize {
        self.challenges
            .get(node_id)
            .map(|c| c.iter().filter(|c| c.is_live(self.ttl)).count())
            .unwrap_or(0)
    }

    /// number of nodes with challenges on record.
    pub fn tracked_nodes(&self) -> usize {
        self.challenges.len()
    }
}
