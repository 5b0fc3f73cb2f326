use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, TryStreamExt, stream};
use tracing::{error, warn};

use common::key_utils::FileName;

use crate::core::meta::{ChunkPlacement, KvDb, read_file_record};
use crate::core::registry::{NodeRegistry, RegistryError};
use crate::core::transfer::ChunkTransfer;

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("file not found")]
    NotFound,
    #[error("chunk {chunk_index} is unavailable on every replica")]
    ChunkUnavailable { chunk_index: u64 },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

/// Reassembles a file from its chunk replicas.
#[derive(Clone)]
pub struct DownloadOrchestrator<T: ChunkTransfer> {
    transfer: T,
    registry: NodeRegistry,
    db: KvDb,
    fetch_concurrency: usize,
}

impl<T: ChunkTransfer> DownloadOrchestrator<T> {
    pub fn new(transfer: T, registry: NodeRegistry, db: KvDb, fetch_concurrency: usize) -> Self {
        Self {
            transfer,
            registry,
            db,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// All bytes of the file, or an error. Never a prefix.
    #[tracing::instrument(name = "coord.download", skip_all, fields(filename = %name.as_str()))]
    pub async fn download(&self, name: &FileName, access_token: &str) -> Result<Bytes, DownloadError> {
        let record = read_file_record(&self.db, name, access_token)?.ok_or(DownloadError::NotFound)?;

        // `buffered` yields in input order, so chunks come back by index even
        // though up to `fetch_concurrency` of them are in flight.
        let fetches: Vec<_> = record.chunks.iter().map(|chunk| self.fetch_chunk(chunk)).collect();
        let parts = stream::iter(fetches)
            .buffered(self.fetch_concurrency)
            .try_collect::<Vec<_>>()
            .await
            .inspect_err(|e| error!(filename = %name.as_str(), "download failed: {e}"))?;

        let mut out = BytesMut::with_capacity(record.size as usize);
        for part in parts {
            out.extend_from_slice(&part);
        }
        Ok(out.freeze())
    }

    /// Walks the replicas in their stored order; the first complete copy wins.
    async fn fetch_chunk(&self, chunk: &ChunkPlacement) -> Result<Bytes, DownloadError> {
        for node_id in &chunk.replicas {
            let Some(node) = self.registry.get(node_id)? else {
                warn!(%node_id, chunk_id = %chunk.chunk_id, "replica on unknown node");
                continue;
            };

            match self.transfer.fetch(&node, &chunk.chunk_id).await {
                Ok(data) if data.len() as u64 == chunk.size => {
                    self.registry.mark_reachable(node_id, true);
                    return Ok(data);
                }
                Ok(data) => {
                    warn!(%node_id, chunk_id = %chunk.chunk_id, expected = chunk.size,
                        got = data.len(), "replica returned wrong size");
                }
                Err(e) => {
                    warn!(%node_id, chunk_id = %chunk.chunk_id, kind = e.kind(), "replica fetch failed: {e}");
                    if e.is_unreachable() {
                        self.registry.mark_reachable(node_id, false);
                    }
                }
            }
        }

        Err(DownloadError::ChunkUnavailable {
            chunk_index: chunk.chunk_index,
        })
    }
}
