use bytes::{Bytes, BytesMut};
use futures_util::future::join_all;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{Instrument, error, info, warn};

use common::key_lock::{KeyGuard, KeyLocks};
use common::key_utils::{FileName, chunk_id_for, file_meta_key};
use common::time_utils::utc_now_ms;

use crate::core::meta::{ChunkPlacement, FileRecord, KvDb, read_file_record, write_file_record};
use crate::core::node::StorageNode;
use crate::core::placement::plan;
use crate::core::registry::{NodeRegistry, RegistryError};
use crate::core::transfer::ChunkTransfer;

#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("file already exists")]
    AlreadyExists,
    #[error("chunk {chunk_index} could not be stored on any node")]
    ChunkUnplaceable { chunk_index: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

mod guard {
    use super::*;

    /// Deletes every acknowledged replica unless disarmed, which happens only
    /// after the FileRecord is durable. Also fires when the upload future is
    /// dropped mid-flight.
    ///
    /// The guard owns the name reservation, which is released only once the
    /// deletes have settled.
    pub struct AbortGuard<T: ChunkTransfer> {
        transfer: T,
        stored: Vec<(StorageNode, String)>,
        reservation: Option<KeyGuard>,
        armed: bool,
    }

    impl<T: ChunkTransfer> AbortGuard<T> {
        pub fn new(transfer: T, reservation: KeyGuard) -> Self {
            Self {
                transfer,
                stored: Vec::new(),
                reservation: Some(reservation),
                armed: true,
            }
        }

        pub fn record(&mut self, node: StorageNode, chunk_id: String) {
            self.stored.push((node, chunk_id));
        }

        pub fn disarm(&mut self) {
            self.armed = false;
        }

        /// Deletes the stored replicas before handing the name back.
        pub async fn abort(mut self) {
            let stored = std::mem::take(&mut self.stored);
            let reservation = self.reservation.take();
            delete_all(self.transfer.clone(), stored).await;
            drop(reservation);
        }
    }

    async fn delete_all<T: ChunkTransfer>(transfer: T, stored: Vec<(StorageNode, String)>) {
        if stored.is_empty() {
            return;
        }
        let futs = stored.iter().map(|(node, chunk_id)| {
            let transfer = transfer.clone();
            async move {
                if let Err(e) = transfer.delete(node, chunk_id).await {
                    warn!(node_id = %node.node_id, %chunk_id, kind = e.kind(),
                        "failed to delete chunk of aborted upload: {e}");
                }
            }
        });
        join_all(futs).await;
        info!(count = stored.len(), "cleaned up chunks of aborted upload");
    }

    impl<T: ChunkTransfer> Drop for AbortGuard<T> {
        fn drop(&mut self) {
            if !self.armed || self.stored.is_empty() {
                return;
            }
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                warn!(count = self.stored.len(), "no runtime to clean up aborted upload");
                return;
            };

            let transfer = self.transfer.clone();
            let stored = std::mem::take(&mut self.stored);
            let reservation = self.reservation.take();
            handle.spawn(async move {
                delete_all(transfer, stored).await;
                drop(reservation);
            });
        }
    }
}

use guard::AbortGuard;

/// Splits a byte stream into chunks, replicates every chunk and commits the
/// resulting [`FileRecord`].
#[derive(Clone)]
pub struct UploadOrchestrator<T: ChunkTransfer> {
    transfer: T,
    registry: NodeRegistry,
    db: KvDb,
    reservations: KeyLocks,
    chunk_size: usize,
    n_replicas: Option<usize>,
}

impl<T: ChunkTransfer> UploadOrchestrator<T> {
    pub fn new(
        transfer: T,
        registry: NodeRegistry,
        db: KvDb,
        reservations: KeyLocks,
        chunk_size: usize,
        n_replicas: Option<usize>,
    ) -> Self {
        Self {
            transfer,
            registry,
            db,
            reservations,
            chunk_size: chunk_size.max(1),
            n_replicas,
        }
    }

    #[tracing::instrument(name = "coord.upload", skip_all, fields(filename = %name.as_str()))]
    pub async fn upload<R>(
        &self,
        mut reader: R,
        name: &FileName,
        access_token: &str,
    ) -> Result<FileRecord, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        // Held until the upload commits or its chunks are deleted, so neither a
        // concurrent upload nor a retry can race the existence check or the
        // cleanup of an aborted attempt.
        let Some(reservation) = self
            .reservations
            .try_acquire(&file_meta_key(name, access_token))
        else {
            return Err(UploadError::AlreadyExists);
        };
        if read_file_record(&self.db, name, access_token)?.is_some() {
            return Err(UploadError::AlreadyExists);
        }

        let mut guard = AbortGuard::new(self.transfer.clone(), reservation);
        match self.store_and_commit(&mut reader, name, access_token, &mut guard).await {
            Ok(record) => {
                guard.disarm();
                info!(size = record.size, n_chunks = record.chunks.len(), "upload committed");
                Ok(record)
            }
            Err(e) => {
                guard.abort().await;
                Err(e)
            }
        }
    }

    async fn store_and_commit<R>(
        &self,
        reader: &mut R,
        name: &FileName,
        access_token: &str,
        guard: &mut AbortGuard<T>,
    ) -> Result<FileRecord, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut chunks = Vec::new();
        let mut size = 0u64;

        for chunk_index in 0u64.. {
            let data = read_chunk(reader, self.chunk_size).await?;
            if data.is_empty() {
                break;
            }

            let chunk_id = chunk_id_for(name, chunk_index, access_token);
            let span = tracing::info_span!("store_chunk", chunk_index, %chunk_id);
            let replicas = self
                .store_chunk(&chunk_id, data.clone(), guard)
                .instrument(span)
                .await?;

            if replicas.is_empty() {
                error!(filename = %name.as_str(), chunk_index, "chunk unplaceable, aborting upload");
                return Err(UploadError::ChunkUnplaceable { chunk_index });
            }

            size += data.len() as u64;
            chunks.push(ChunkPlacement {
                chunk_index,
                chunk_id,
                size: data.len() as u64,
                replicas,
            });
        }

        let record = FileRecord {
            filename: name.as_str().to_string(),
            size,
            access_token: access_token.to_string(),
            created_ms: utc_now_ms(),
            chunks,
        };
        write_file_record(&self.db, name, &record)?;
        Ok(record)
    }

    /// Stores one chunk on every planned node at once. Returns the node ids
    /// that acknowledged, in planned order.
    async fn store_chunk(
        &self,
        chunk_id: &str,
        data: Bytes,
        guard: &mut AbortGuard<T>,
    ) -> Result<Vec<String>, UploadError> {
        let nodes = self.registry.list()?;
        let planned = {
            let mut rng = rand::rng();
            plan(&nodes, self.n_replicas, &mut rng)
        };

        let results = join_all(planned.iter().map(|node| {
            let data = data.clone();
            async move { self.transfer.store(node, chunk_id, data).await }
        }))
        .await;

        let mut replicas = Vec::with_capacity(planned.len());
        for (node, result) in planned.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    self.registry.mark_reachable(&node.node_id, true);
                    replicas.push(node.node_id.clone());
                    guard.record(node, chunk_id.to_string());
                }
                Err(e) => {
                    warn!(node_id = %node.node_id, %chunk_id, kind = e.kind(), "replica store failed: {e}");
                    if e.is_unreachable() {
                        self.registry.mark_reachable(&node.node_id, false);
                    }
                }
            }
        }

        Ok(replicas)
    }
}

/// Initial allocation for a chunk buffer; larger chunks grow as data arrives.
const READ_BUF_INITIAL: usize = 1024 * 1024;

/// Reads up to `chunk_size` bytes, short only at end of input.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, chunk_size: usize) -> io::Result<Bytes> {
    let mut buf = BytesMut::with_capacity(chunk_size.min(READ_BUF_INITIAL));
    let mut limited = (&mut *reader).take(chunk_size as u64);
    while buf.len() < chunk_size {
        if buf.len() == buf.capacity() {
            buf.reserve((chunk_size - buf.len()).min(READ_BUF_INITIAL));
        }
        if limited.read_buf(&mut buf).await? == 0 {
            break;
        }
    }
    Ok(buf.freeze())
}
