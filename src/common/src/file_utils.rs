use axum::http::HeaderMap;
use bytes::Bytes;
use futures_util::StreamExt;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::error;

use crate::constants::{CHUNK_DIR_NAME, TMP_DIR_NAME};
use crate::error::ApiError;

const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

pub fn parse_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(axum::http::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn shard_dirs(chunk_id: &str) -> (String, String) {
    let hash = blake3::hash(chunk_id.as_bytes());
    let bytes = hash.as_bytes();
    (format!("{:02x}", bytes[0]), format!("{:02x}", bytes[1]))
}

/// `<root>/chunks/<aa>/<bb>/<chunk_id>`
pub fn chunk_path(root: &Path, chunk_id: &str) -> PathBuf {
    let (a, b) = shard_dirs(chunk_id);
    root.join(CHUNK_DIR_NAME).join(a).join(b).join(chunk_id)
}

pub fn tmp_path(root: &Path, staged_id: &str) -> PathBuf {
    root.join(TMP_DIR_NAME).join(staged_id)
}

pub async fn init_dirs(root: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(root.join(CHUNK_DIR_NAME)).await?;
    fs::create_dir_all(root.join(TMP_DIR_NAME)).await?;

    Ok(())
}

/// Removes every staged file left behind by a previous process. Returns how many were removed.
pub async fn clear_tmp_dir(root: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = match fs::read_dir(root.join(TMP_DIR_NAME)).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

pub async fn file_exists(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

pub async fn fsync_dir(dir: &Path) -> io::Result<()> {
    let dirf = std::fs::File::open(dir)?;
    dirf.sync_all()?;
    Ok(())
}

/// Drains `stream` into `file`, coalescing small frames into larger writes.
/// Returns the number of bytes written. The file is flushed but not synced.
///
/// Fails with [`ApiError::TooLarge`] as soon as more than `max_len` bytes arrive.
pub async fn stream_to_file<S, E>(mut stream: S, file: &mut File, max_len: u64) -> Result<u64, ApiError>
where
    S: futures_util::Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut total: u64 = 0;
    let mut buffer = Vec::with_capacity(WRITE_BUFFER_SIZE);

    while let Some(next) = stream.next().await {
        let frame: Bytes = next.map_err(|e| {
            error!("stream error: {e}");
            ApiError::Any(anyhow::anyhow!("stream error: {e}"))
        })?;

        total = total
            .checked_add(frame.len() as u64)
            .filter(|t| *t <= max_len)
            .ok_or(ApiError::TooLarge)?;

        buffer.extend_from_slice(&frame);
        if buffer.len() >= WRITE_BUFFER_SIZE {
            file.write_all(&buffer).await?;
            buffer.clear();
        }
    }

    if !buffer.is_empty() {
        file.write_all(&buffer).await?;
    }
    file.flush().await?;

    Ok(total)
}
