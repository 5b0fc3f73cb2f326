use rocksdb::{DB, Direction, IteratorMode, Options, WriteOptions};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{path::Path, sync::Arc};

use common::constants::FILE_KEY_PREFIX;
use common::key_utils::{FileName, file_meta_key, file_meta_prefix};

const MAX_OPEN_FILES: i32 = 512;

#[derive(Clone)]
pub struct KvDb {
    inner: Arc<DB>,
}

impl KvDb {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_level_compaction_dynamic_level_bytes(true);
        opts.set_max_open_files(MAX_OPEN_FILES);
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_max_background_jobs(4);
        opts.set_bytes_per_sync(1024 * 1024);

        let db = DB::open(&opts, path)?;
        Ok(Self {
            inner: Arc::new(db),
        })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.inner.get(key.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice::<T>(&raw)?)),
            None => Ok(None),
        }
    }

    /// Synced put: returns only once the value is durable.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let buf = serde_json::to_vec(value)?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.inner.put_opt(key.as_bytes(), buf, &write_opts)?;
        Ok(())
    }

    /// All values whose key starts with `prefix`, in key order.
    pub fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<Vec<(String, T)>> {
        let mut out = Vec::new();
        let iter = self
            .inner
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for kv in iter {
            let (k, v) = kv?;
            if !k.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8_lossy(&k).into_owned();
            out.push((key, serde_json::from_slice::<T>(&v)?));
        }
        Ok(out)
    }
}

/// Where one chunk of a file lives. `replicas` is the fetch priority order,
/// fixed at write time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkPlacement {
    pub chunk_index: u64,
    pub chunk_id: String,
    pub size: u64,
    pub replicas: Vec<String>, // node_ids
}

/// The persisted unit of metadata. Written once, after every chunk has at
/// least one replica; its existence is the upload's commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub filename: String,
    pub size: u64,
    pub access_token: String,
    pub created_ms: i128,
    pub chunks: Vec<ChunkPlacement>,
}

impl FileRecord {
    /// Contiguous 0-based indices, a replica for every chunk, sizes adding up.
    pub fn is_well_formed(&self) -> bool {
        let contiguous = self
            .chunks
            .iter()
            .enumerate()
            .all(|(i, c)| c.chunk_index == i as u64);
        let replicated = self.chunks.iter().all(|c| !c.replicas.is_empty());
        let total: u64 = self.chunks.iter().map(|c| c.size).sum();
        contiguous && replicated && total == self.size
    }

    pub fn summary(&self) -> FileSummary {
        FileSummary {
            filename: self.filename.clone(),
            size: self.size,
            n_chunks: self.chunks.len(),
            created_ms: self.created_ms,
            chunks: self.chunks.clone(),
        }
    }
}

/// Listing projection of a [`FileRecord`]; never carries the access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSummary {
    pub filename: String,
    pub size: u64,
    pub n_chunks: usize,
    pub created_ms: i128,
    pub chunks: Vec<ChunkPlacement>,
}

pub fn read_file_record(
    db: &KvDb,
    name: &FileName,
    access_token: &str,
) -> anyhow::Result<Option<FileRecord>> {
    db.get(&file_meta_key(name, access_token))
}

pub fn write_file_record(db: &KvDb, name: &FileName, record: &FileRecord) -> anyhow::Result<()> {
    db.put(&file_meta_key(name, &record.access_token), record)
}

pub fn list_file_records(db: &KvDb, access_token: &str) -> anyhow::Result<Vec<FileRecord>> {
    Ok(db
        .scan_prefix::<FileRecord>(&file_meta_prefix(access_token))?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

/// Every record regardless of token. Used by the offline commands.
pub fn all_file_records(db: &KvDb) -> anyhow::Result<Vec<FileRecord>> {
    Ok(db
        .scan_prefix::<FileRecord>(&format!("{}:", FILE_KEY_PREFIX))?
        .into_iter()
        .map(|(_, record)| record)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, token: &str, sizes: &[u64]) -> FileRecord {
        FileRecord {
            filename: name.to_string(),
            size: sizes.iter().sum(),
            access_token: token.to_string(),
            created_ms: 0,
            chunks: sizes
                .iter()
                .enumerate()
                .map(|(i, s)| ChunkPlacement {
                    chunk_index: i as u64,
                    chunk_id: format!("{name}.chunk{i}"),
                    size: *s,
                    replicas: vec!["n1".to_string(), "n2".to_string()],
                })
                .collect(),
        }
    }

    #[test]
    fn records_round_trip_and_are_scoped_by_token() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let db = KvDb::open(dir.path())?;

        let name = FileName::parse("a.bin")?;
        let alice = record("a.bin", "alice", &[10, 10, 3]);
        let bob = record("a.bin", "bob", &[7]);
        write_file_record(&db, &name, &alice)?;
        write_file_record(&db, &name, &bob)?;
        write_file_record(&db, &FileName::parse("b.bin")?, &record("b.bin", "alice", &[1]))?;

        assert_eq!(read_file_record(&db, &name, "alice")?, Some(alice.clone()));
        assert_eq!(read_file_record(&db, &name, "bob")?, Some(bob));
        assert_eq!(read_file_record(&db, &name, "carol")?, None);

        let listed = list_file_records(&db, "alice")?;
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.access_token == "alice"));
        assert_eq!(all_file_records(&db)?.len(), 3);
        Ok(())
    }

    #[test]
    fn well_formed_checks_layout() {
        let mut r = record("x", "t", &[4, 4, 2]);
        assert!(r.is_well_formed());

        r.chunks[1].replicas.clear();
        assert!(!r.is_well_formed());

        let mut gap = record("x", "t", &[4, 4]);
        gap.chunks[1].chunk_index = 2;
        assert!(!gap.is_well_formed());

        let mut size = record("x", "t", &[4]);
        size.size = 5;
        assert!(!size.is_well_formed());

        assert!(record("empty", "t", &[]).is_well_formed());
    }

    #[test]
    fn summary_hides_token() -> anyhow::Result<()> {
        let summary = record("s.txt", "secret-token", &[3, 1]).summary();
        assert_eq!(summary.n_chunks, 2);
        assert_eq!(summary.size, 4);
        assert!(!serde_json::to_string(&summary)?.contains("secret-token"));
        Ok(())
    }
}
