//! registry of nodes and their per-node state.
//!
//! each registered node id owns exactly one [`NodeRecord`]. the record
//! carries the metadata captured at registration, the handle of the running
//! node process (if any) and a broadcast channel waking everyone parked in
//! [`NodeRecord::wait_scheduled`] when the node comes up.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lightyard_ca::Identity;
use lightyard_types::{Network, NodeId, StartupMessage};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::{Endpoint, Error, NodeProcess, Result};

/// everything captured about a node when it registers.
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    /// version string reported by the signer, used to pick the node binary.
    pub signer_version: String,
    /// bitcoin network the node runs on.
    pub network: Network,
    /// working directory of the node process.
    pub directory: PathBuf,
    /// node-level tls identity (`/users/<id>/node`).
    pub identity: Identity,
    /// init message the signer sent during registration.
    pub init_msg: Vec<u8>,
    /// request/response pairs replayed to the node on startup.
    pub startup_messages: Vec<StartupMessage>,
}

/// lifecycle events broadcast to a record's subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// the node process is reachable at this endpoint.
    Scheduled(Endpoint),
    /// the node process was stopped.
    Stopped,
}

/// per-node state.
pub struct NodeRecord {
    node_id: NodeId,
    metadata: NodeMetadata,
    created_at: DateTime<Utc>,
    /// serializes start/stop of this node's process.
    lifecycle: tokio::sync::Mutex<()>,
    /// the running process. only ever locked briefly, never across an await.
    process: Mutex<Option<Box<dyn NodeProcess>>>,
    events: broadcast::Sender<NodeEvent>,
    recoveries: AtomicU64,
}

impl NodeRecord {
    pub fn new(node_id: NodeId, metadata: NodeMetadata) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            node_id,
            metadata,
            created_at: Utc::now(),
            lifecycle: tokio::sync::Mutex::new(()),
            process: Mutex::new(None),
            events,
            recoveries: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// take the lifecycle lock. held for the whole of a start or stop, so
    /// operations on one node never interleave while other nodes proceed.
    pub async fn lock_lifecycle(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }

    /// endpoint of the running process.
    ///
    /// a process that has exited is dropped here, so process death shows up
    /// on the next lookup.
    pub fn endpoint(&self) -> Option<Endpoint> {
        let mut slot = self.process.lock().expect("process slot mutex poisoned");
        self.live_endpoint(&mut slot)
    }

    /// install a freshly started process and wake every waiter.
    pub fn install_process(&self, process: Box<dyn NodeProcess>) -> Endpoint {
        let endpoint = process.endpoint().clone();
        let mut slot = self.process.lock().expect("process slot mutex poisoned");
        *slot = Some(process);
        // sent while the slot is locked so a concurrent waiter either sees
        // the process or is already subscribed
        let woken = self
            .events
            .send(NodeEvent::Scheduled(endpoint.clone()))
            .unwrap_or(0);
        info!(
            node_id = %self.node_id.short_string(),
            uri = %endpoint.grpc_uri(),
            waiters = woken,
            "node scheduled"
        );
        endpoint
    }

    /// remove the process handle, leaving the node unscheduled.
    pub fn take_process(&self) -> Option<Box<dyn NodeProcess>> {
        let mut slot = self.process.lock().expect("process slot mutex poisoned");
        let process = slot.take();
        if process.is_some() {
            let _ = self.events.send(NodeEvent::Stopped);
        }
        process
    }

    /// subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// wait until the node is scheduled and return its endpoint.
    ///
    /// returns immediately if a live process exists. otherwise parks until
    /// the next successful schedule; dropping the future releases only this
    /// waiter's subscription.
    pub async fn wait_scheduled(&self) -> Endpoint {
        loop {
            let mut rx = {
                let mut slot = self.process.lock().expect("process slot mutex poisoned");
                if let Some(endpoint) = self.live_endpoint(&mut slot) {
                    return endpoint;
                }
                self.events.subscribe()
            };

            loop {
                match rx.recv().await {
                    Ok(NodeEvent::Scheduled(endpoint)) => return endpoint,
                    Ok(NodeEvent::Stopped) => continue,
                    // missed events, look at the slot again
                    Err(RecvError::Lagged(_)) | Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// next sequence number for legacy recovery identities.
    pub fn next_recovery(&self) -> u64 {
        self.recoveries.fetch_add(1, Ordering::Relaxed)
    }

    fn live_endpoint(&self, slot: &mut Option<Box<dyn NodeProcess>>) -> Option<Endpoint> {
        let process = slot.as_mut()?;
        if process.is_alive() {
            return Some(process.endpoint().clone());
        }
        warn!(
            node_id = %self.node_id.short_string(),
            pid = ?process.pid(),
            "node process exited, clearing handle"
        );
        // the leader is gone but what it forked may not be
        if let Some(mut process) = slot.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let node = self.node_id.short_string();
                    runtime.spawn(async move {
                        if let Err(e) = process.stop().await {
                            warn!(node_id = %node, error = %e, "failed to clean up exited node");
                        }
                    });
                }
                Err(_) => drop(process),
            }
        }
        None
    }
}

impl std::fmt::Debug for NodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRecord")
            .field("node_id", &self.node_id)
            .field("network", &self.metadata.network)
            .field("signer_version", &self.metadata.signer_version)
            .finish_non_exhaustive()
    }
}

enum Slot {
    /// a registration is in flight.
    Pending,
    Registered(Arc<NodeRecord>),
}

/// all registered nodes.
///
/// registration is two-phase: [`NodeRegistry::claim`] reserves the node id,
/// and only the holder of the claim can turn it into a record. a second
/// claim for the same id fails while the first is alive or committed.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<NodeId, Slot>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// reserve `node_id` for registration.
    pub fn claim(&self, node_id: NodeId) -> Result<RegistrationClaim<'_>> {
        match self.nodes.entry(node_id) {
            Entry::Occupied(_) => Err(Error::NodeAlreadyExists(node_id)),
            Entry::Vacant(v) => {
                v.insert(Slot::Pending);
                debug!(node_id = %node_id.short_string(), "claimed node id");
                Ok(RegistrationClaim {
                    registry: self,
                    node_id,
                    committed: false,
                })
            }
        }
    }

    /// look up a registered node.
    pub fn lookup(&self, node_id: &NodeId) -> Result<Arc<NodeRecord>> {
        match self.nodes.get(node_id).as_deref() {
            Some(Slot::Registered(record)) => Ok(record.clone()),
            _ => Err(Error::NodeNotFound(*node_id)),
        }
    }

    /// whether `node_id` is registered.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.lookup(node_id).is_ok()
    }

    /// all registered records.
    pub fn records(&self) -> Vec<Arc<NodeRecord>> {
        self.nodes
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Registered(record) => Some(record.clone()),
                Slot::Pending => None,
            })
            .collect()
    }

    /// number of registered nodes.
    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// an exclusive reservation of a node id.
///
/// dropping the claim without committing releases the id again.
pub struct RegistrationClaim<'a> {
    registry: &'a NodeRegistry,
    node_id: NodeId,
    committed: bool,
}

impl RegistrationClaim<'_> {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// store the record, completing the registration.
    pub fn commit(mut self, metadata: NodeMetadata) -> Arc<NodeRecord> {
        let record = Arc::new(NodeRecord::new(self.node_id, metadata));
        self.registry
            .nodes
            .insert(self.node_id, Slot::Registered(record.clone()));
        self.committed = true;
        info!(node_id = %self.node_id.short_string(), "registered node");
        record
    }
}

impl Drop for RegistrationClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry
                .nodes
                .remove_if(&self.node_id, |_, slot| matches!(slot, Slot::Pending));
            debug!(node_id = %self.node_id.short_string(), "released node id claim");
        }
    }
}
