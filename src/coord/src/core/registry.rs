use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};
use uuid::Uuid;

use common::constants::NODE_KEY_PREFIX;
use common::key_utils::node_key;
use common::schemas::JoinRequest;
use common::time_utils::utc_now_ms;
use common::url_utils::sanitize_url;

use crate::core::meta::KvDb;
use crate::core::node::StorageNode;

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("invalid node address: {0}")]
    BadAddress(anyhow::Error),
    #[error("node registry lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// The set of known storage nodes.
///
/// Every mutation goes through the write lock, and is persisted under
/// `node:<id>` before the lock is released, so registrations are serialized and
/// survive a coordinator restart.
#[derive(Clone)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<HashMap<String, StorageNode>>>,
    db: KvDb,
}

impl NodeRegistry {
    /// Loads previously registered nodes from `db`.
    pub fn load(db: KvDb) -> anyhow::Result<Self> {
        let nodes = db
            .scan_prefix::<StorageNode>(&format!("{}:", NODE_KEY_PREFIX))?
            .into_iter()
            .map(|(_, node)| (node.node_id.clone(), node))
            .collect::<HashMap<_, _>>();

        if !nodes.is_empty() {
            info!(count = nodes.len(), "loaded registered nodes");
        }

        Ok(Self {
            nodes: Arc::new(RwLock::new(nodes)),
            db,
        })
    }

    /// Registers a node, or returns the existing entry if its address is
    /// already known. The returned node is marked reachable either way.
    pub fn register(&self, req: &JoinRequest) -> Result<StorageNode, RegistryError> {
        let address = sanitize_url(&req.address).map_err(RegistryError::BadAddress)?;

        let mut nodes = self.nodes.write().map_err(|_| RegistryError::Poisoned)?;

        if let Some(existing) = nodes.values_mut().find(|n| n.address == address) {
            existing.reachable = true;
            existing.capacity_bytes = req.capacity_bytes.or(existing.capacity_bytes);
            existing.used_bytes = req.used_bytes.or(existing.used_bytes);
            if req.version.is_some() {
                existing.version = req.version.clone();
            }
            self.db.put(&node_key(&existing.node_id), existing)?;
            info!(node_id = %existing.node_id, %address, "node re-registered");
            return Ok(existing.clone());
        }

        let node = StorageNode {
            node_id: Uuid::new_v4().to_string(),
            address: address.clone(),
            registered_ms: utc_now_ms(),
            reachable: true,
            capacity_bytes: req.capacity_bytes,
            used_bytes: req.used_bytes,
            version: req.version.clone(),
        };
        self.db.put(&node_key(&node.node_id), &node)?;
        nodes.insert(node.node_id.clone(), node.clone());

        info!(node_id = %node.node_id, %address, "node registered");
        Ok(node)
    }

    /// All nodes, oldest registration first.
    pub fn list(&self) -> Result<Vec<StorageNode>, RegistryError> {
        let nodes = self.nodes.read().map_err(|_| RegistryError::Poisoned)?;
        let mut out = nodes.values().cloned().collect::<Vec<_>>();
        out.sort_by(|a, b| {
            a.registered_ms
                .cmp(&b.registered_ms)
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        Ok(out)
    }

    pub fn get(&self, node_id: &str) -> Result<Option<StorageNode>, RegistryError> {
        let nodes = self.nodes.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(nodes.get(node_id).cloned())
    }

    /// Records the outcome of a transfer against `node_id`. Advisory only:
    /// placement and fetch order never look at it.
    pub fn mark_reachable(&self, node_id: &str, reachable: bool) {
        let Ok(mut nodes) = self.nodes.write() else {
            return;
        };
        let Some(node) = nodes.get_mut(node_id) else {
            return;
        };
        if node.reachable == reachable {
            return;
        }
        node.reachable = reachable;
        if let Err(e) = self.db.put(&node_key(node_id), node) {
            warn!(%node_id, "failed to persist reachability: {e:#}");
        }
    }
}
