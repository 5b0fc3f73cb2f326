use serde::{Deserialize, Serialize};

/// A registered storage node. Owned by the node registry; only `reachable`
/// and the reported capacity fields change after registration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageNode {
    pub node_id: String,         // assigned by the registry (uuid)
    pub address: String,         // base URL, normalized
    pub registered_ms: i128,     // UTC epoch ms of first registration
    pub reachable: bool,         // advisory, from transfer outcomes
    pub capacity_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub version: Option<String>,
}
