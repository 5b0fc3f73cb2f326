use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use common::key_lock::KeyLocks;

use crate::core::download::DownloadOrchestrator;
use crate::core::meta::KvDb;
use crate::core::registry::NodeRegistry;
use crate::core::transfer::HttpTransfer;
use crate::core::upload::UploadOrchestrator;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Holds `tmp/` for staged uploads.
    pub data_root: PathBuf,
    pub chunk_size: usize,
    /// `None` replicates every chunk to every registered node.
    pub n_replicas: Option<usize>,
    pub max_inflight: usize,
    pub max_size: u64,
    pub transfer_timeout: Duration,
    pub fetch_concurrency: usize,
}

#[derive(Clone)]
pub struct CoordinatorState {
    pub db: KvDb,
    pub registry: NodeRegistry,
    pub uploader: UploadOrchestrator<HttpTransfer>,
    pub downloader: DownloadOrchestrator<HttpTransfer>,

    pub inflight: Arc<Semaphore>,
    pub data_root: Arc<PathBuf>,
    pub max_size: u64,
}

impl CoordinatorState {
    /// Wires the orchestrators over one HTTP client and reloads the registry from `db`.
    pub fn new(config: CoordinatorConfig, db: KvDb) -> anyhow::Result<Self> {
        let registry = NodeRegistry::load(db.clone())?;
        let transfer = HttpTransfer::new(Client::new(), config.transfer_timeout);

        let uploader = UploadOrchestrator::new(
            transfer.clone(),
            registry.clone(),
            db.clone(),
            KeyLocks::new(),
            config.chunk_size,
            config.n_replicas,
        );
        let downloader = DownloadOrchestrator::new(
            transfer,
            registry.clone(),
            db.clone(),
            config.fetch_concurrency,
        );

        Ok(Self {
            db,
            registry,
            uploader,
            downloader,
            inflight: Arc::new(Semaphore::new(config.max_inflight.max(1))),
            data_root: Arc::new(config.data_root),
            max_size: config.max_size,
        })
    }
}
