//! Wire types exchanged between the coordinator and storage nodes.

use serde::{Deserialize, Serialize};

/// Body of `POST /admin/join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Base URL the coordinator uses to reach the node.
    pub address: String,
    pub capacity_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinResponse {
    pub node_id: String,
}

/// One line of the NDJSON body answering a chunk store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreAck {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkHead {
    pub exists: bool,
    pub size: u64,
    /// Last modification time of the chunk file, epoch ms.
    pub modified_ms: Option<i128>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkListResponse {
    pub chunk_ids: Vec<String>,
    pub next_after: Option<String>,
}
