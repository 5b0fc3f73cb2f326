use bytes::Bytes;
use nix::sys::statvfs::statvfs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use common::constants::CHUNK_DIR_NAME;
use common::error::ApiError;
use common::file_utils::{chunk_path, file_exists, fsync_dir, stream_to_file, tmp_path};
use common::key_lock::KeyLocks;
use common::key_utils::validate_chunk_id;
use common::schemas::{ChunkHead, ChunkListResponse};
use common::time_utils::system_time_ms;

use crate::state::DurabilityLevel;

pub const DEFAULT_PAGE_LIMIT: usize = 1000;
pub const MAX_PAGE_LIMIT: usize = 5000;

pub fn disk_usage(root: &Path) -> anyhow::Result<(Option<u64>, Option<u64>)> {
    let v = statvfs(root)?;
    let cap = v.blocks() as u64 * v.fragment_size() as u64;
    let free = v.blocks_available() as u64 * v.fragment_size() as u64;
    let used = cap.saturating_sub(free);
    Ok((Some(used), Some(cap)))
}

async fn conditional_sync_file(file: &mut File, durability: DurabilityLevel) -> io::Result<()> {
    match durability {
        DurabilityLevel::Immediate => file.sync_all().await,
        DurabilityLevel::Os => Ok(()),
    }
}

async fn conditional_sync_dir(dir: &Path, durability: DurabilityLevel) -> io::Result<()> {
    match durability {
        DurabilityLevel::Immediate => fsync_dir(dir).await,
        DurabilityLevel::Os => Ok(()),
    }
}

/// Staged file removed on drop unless it was renamed into place.
struct Staged {
    path: PathBuf,
    published: bool,
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.published {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Flat `chunk_id -> bytes` storage under `<root>/chunks`.
///
/// Chunks are create-or-reject: a chunk id is written at most once, and two
/// concurrent writers of the same id never interleave. One of them gets
/// [`ApiError::ChunkAlreadyExists`].
#[derive(Clone)]
pub struct ChunkStore {
    root: Arc<PathBuf>,
    writers: KeyLocks,
    durability: DurabilityLevel,
}

impl ChunkStore {
    pub fn new(root: PathBuf, durability: DurabilityLevel) -> Self {
        Self {
            root: Arc::new(root),
            writers: KeyLocks::new(),
            durability,
        }
    }

    /// Streams `body` to a staged file and publishes it under `chunk_id`.
    /// Returns the stored size.
    pub async fn put<S, E>(&self, chunk_id: &str, body: S) -> Result<u64, ApiError>
    where
        S: futures_util::Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        validate_chunk_id(chunk_id)?;

        let Some(_writer) = self.writers.try_acquire(chunk_id) else {
            return Err(ApiError::ChunkAlreadyExists);
        };
        let final_path = chunk_path(&self.root, chunk_id);
        if file_exists(&final_path).await {
            return Err(ApiError::ChunkAlreadyExists);
        }

        let mut staged = Staged {
            path: tmp_path(&self.root, &Uuid::new_v4().to_string()),
            published: false,
        };
        let mut file = File::create(&staged.path).await?;
        let size = stream_to_file(body, &mut file, u64::MAX).await?;
        if size == 0 {
            return Err(ApiError::BadRequest("empty chunk".to_string()));
        }
        conditional_sync_file(&mut file, self.durability).await?;
        drop(file);

        let final_dir = final_path
            .parent()
            .ok_or_else(|| ApiError::Any(anyhow::anyhow!("chunk path has no parent")))?;
        fs::create_dir_all(final_dir).await?;
        fs::rename(&staged.path, &final_path).await?;
        staged.published = true;
        conditional_sync_dir(final_dir, self.durability).await?;

        debug!(%chunk_id, size, "chunk stored");
        Ok(size)
    }

    pub async fn open(&self, chunk_id: &str) -> Result<(File, u64), ApiError> {
        validate_chunk_id(chunk_id)?;
        let path = chunk_path(&self.root, chunk_id);
        match File::open(&path).await {
            Ok(file) => {
                let size = file.metadata().await?.len();
                Ok((file, size))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ApiError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether a chunk was actually removed.
    pub async fn delete(&self, chunk_id: &str) -> Result<bool, ApiError> {
        validate_chunk_id(chunk_id)?;
        match fs::remove_file(chunk_path(&self.root, chunk_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn head(&self, chunk_id: &str) -> Result<ChunkHead, ApiError> {
        validate_chunk_id(chunk_id)?;
        match fs::metadata(chunk_path(&self.root, chunk_id)).await {
            Ok(meta) => Ok(ChunkHead {
                exists: true,
                size: meta.len(),
                modified_ms: meta.modified().ok().map(system_time_ms),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ChunkHead {
                exists: false,
                size: 0,
                modified_ms: None,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// One page of stored chunk ids in lexicographic order, strictly after `after`.
    pub async fn list(&self, after: Option<&str>, limit: usize) -> Result<ChunkListResponse, ApiError> {
        let root = self.root.join(CHUNK_DIR_NAME);
        let after = after.map(str::to_string);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);

        // TODO: keep a sorted index once volumes hold millions of chunks; this walks every shard.
        let mut ids = tokio::task::spawn_blocking(move || {
            let mut ids = Vec::new();
            for entry in WalkDir::new(&root).min_depth(3).max_depth(3) {
                match entry {
                    Ok(e) if e.file_type().is_file() => {
                        ids.push(e.file_name().to_string_lossy().into_owned());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("skipping unreadable entry: {e}"),
                }
            }
            ids
        })
        .await
        .map_err(|e| ApiError::Any(e.into()))?;

        ids.sort_unstable();
        let mut page = ids
            .into_iter()
            .filter(|id| after.as_deref().is_none_or(|a| id.as_str() > a))
            .take(limit + 1)
            .collect::<Vec<_>>();

        let next_after = if page.len() > limit {
            page.truncate(limit);
            page.last().cloned()
        } else {
            None
        };

        Ok(ChunkListResponse {
            chunk_ids: page,
            next_after,
        })
    }
}
