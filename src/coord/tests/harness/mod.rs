#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::Router;
use axum_server::Server;
use reqwest::{Client, Response};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use common::constants::{ACCESS_TOKEN_HEADER, TMP_DIR_NAME};
use common::file_utils::{chunk_path, init_dirs};
use common::schemas::JoinRequest;
use common::url_utils::encode_path_segment;
use coord::command::serve::build_router;
use coord::core::meta::KvDb;
use coord::core::state::{CoordinatorConfig, CoordinatorState};
use volume::agent::{AgentConfig, register_once};
use volume::state::{DurabilityLevel, VolumeState};
use volume::store::ChunkStore;

pub const CHUNK_SIZE: usize = 64 * 1024;

/// Initialize tracing for tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

pub struct Served {
    pub handle: JoinHandle<Result<()>>,
    pub addr: SocketAddr,
    pub url: String,
}

impl Drop for Served {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn serve(app: Router) -> Result<Served> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;

    let handle = tokio::spawn(async move {
        Server::from_tcp(std_listener)
            .serve(app.into_make_service())
            .await?;
        Ok(())
    });

    Ok(Served {
        handle,
        addr,
        url: format!("http://{addr}"),
    })
}

pub fn test_config(data_root: &Path) -> CoordinatorConfig {
    CoordinatorConfig {
        data_root: data_root.to_path_buf(),
        chunk_size: CHUNK_SIZE,
        n_replicas: None,
        max_inflight: 4,
        max_size: 64 * 1024 * 1024,
        transfer_timeout: Duration::from_secs(2),
        fetch_concurrency: 4,
    }
}

async fn open_state(
    data_dir: &TempDir,
    tweak: impl FnOnce(&mut CoordinatorConfig),
) -> Result<CoordinatorState> {
    init_dirs(data_dir.path()).await?;
    let db = KvDb::open(&data_dir.path().join("index"))?;
    let mut config = test_config(data_dir.path());
    tweak(&mut config);
    CoordinatorState::new(config, db)
}

pub struct TestCoordinator {
    pub server: Served,
    pub state: CoordinatorState,
    pub data_dir: TempDir,
}

impl TestCoordinator {
    pub async fn start() -> Result<Self> {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut CoordinatorConfig)) -> Result<Self> {
        let data_dir = TempDir::new()?;
        let state = open_state(&data_dir, tweak).await?;
        let server = serve(build_router(state.clone())).await?;
        Ok(Self {
            server,
            state,
            data_dir,
        })
    }

    pub fn url(&self) -> &str {
        &self.server.url
    }

    pub fn file_url(&self, filename: &str) -> String {
        format!("{}/files/{}", self.server.url, encode_path_segment(filename))
    }

    /// Number of upload bodies still staged under `tmp/`.
    pub fn staged_files(&self) -> usize {
        std::fs::read_dir(self.data_dir.path().join(TMP_DIR_NAME))
            .map(|d| d.count())
            .unwrap_or(0)
    }
}

/// Coordinator state with no HTTP server in front of it. Dropping it closes
/// the index, which the offline commands need.
pub struct OfflineCoordinator {
    pub state: CoordinatorState,
    pub data_dir: TempDir,
}

impl OfflineCoordinator {
    pub async fn open() -> Result<Self> {
        let data_dir = TempDir::new()?;
        let state = open_state(&data_dir, |_| {}).await?;
        Ok(Self { state, data_dir })
    }

    pub fn register(&self, vol: &TestVolume) -> Result<String> {
        let node = self.state.registry.register(&JoinRequest {
            address: vol.url().to_string(),
            capacity_bytes: None,
            used_bytes: None,
            version: None,
        })?;
        Ok(node.node_id)
    }

    /// Closes the index and hands back its directory.
    pub fn close(self) -> (TempDir, PathBuf) {
        let index = self.data_dir.path().join("index");
        drop(self.state);
        (self.data_dir, index)
    }
}

pub struct TestVolume {
    pub server: Served,
    pub state: VolumeState,
    pub data_dir: TempDir,
    pub node_id: String,
}

impl TestVolume {
    /// Starts a volume without registering it anywhere.
    pub async fn start() -> Result<Self> {
        let data_dir = TempDir::new()?;
        init_dirs(data_dir.path()).await?;

        let store = ChunkStore::new(data_dir.path().to_path_buf(), DurabilityLevel::Os);
        let state = VolumeState::new(store);
        let server = serve(volume::routes::router(state.clone())).await?;

        Ok(Self {
            server,
            state,
            data_dir,
            node_id: String::new(),
        })
    }

    pub async fn start_and_join(coordinator_url: &str) -> Result<Self> {
        let mut vol = Self::start().await?;
        vol.node_id = vol.join(coordinator_url).await?;
        Ok(vol)
    }

    pub fn agent_config(&self, coordinator_url: &str) -> AgentConfig {
        AgentConfig {
            coordinator_url: coordinator_url.to_string(),
            advertise_url: self.server.url.clone(),
            data_root: self.data_dir.path().to_path_buf(),
            register_retry: Duration::from_millis(50),
            liveness_interval: None,
            http: http(),
        }
    }

    pub async fn join(&self, coordinator_url: &str) -> Result<String> {
        register_once(&self.agent_config(coordinator_url)).await
    }

    pub fn url(&self) -> &str {
        &self.server.url
    }

    pub fn has_chunk(&self, chunk_id: &str) -> bool {
        chunk_path(self.data_dir.path(), chunk_id).exists()
    }

    async fn admin_post(&self, path: &str) -> Result<()> {
        http()
            .post(format!("{}{}", self.server.url, path))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn kill(&self) -> Result<()> {
        self.admin_post("/admin/kill").await
    }

    pub async fn fail_stores(&self) -> Result<()> {
        self.admin_post("/admin/fail/store?always=true").await
    }

    pub async fn fail_fetch_once(&self) -> Result<()> {
        self.admin_post("/admin/fail/fetch?once=true").await
    }

    pub async fn inject_latency(&self, latency_ms: u64) -> Result<()> {
        self.admin_post(&format!("/admin/inject/latency?latency_ms={latency_ms}"))
            .await
    }

    pub async fn reset(&self) -> Result<()> {
        self.admin_post("/admin/reset").await
    }
}

pub async fn start_volumes(coordinator_url: &str, n: usize) -> Result<Vec<TestVolume>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(TestVolume::start_and_join(coordinator_url).await?);
    }
    Ok(out)
}

pub fn http() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("http client")
}

pub async fn put_file(coord: &TestCoordinator, name: &str, token: &str, body: Vec<u8>) -> Result<Response> {
    Ok(http()
        .put(coord.file_url(name))
        .header(ACCESS_TOKEN_HEADER, token)
        .body(body)
        .send()
        .await?)
}

pub async fn get_file(coord: &TestCoordinator, name: &str, token: &str) -> Result<Response> {
    Ok(http()
        .get(coord.file_url(name))
        .header(ACCESS_TOKEN_HEADER, token)
        .send()
        .await?)
}

/// Byte pattern whose period (251) does not divide the chunk size.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub async fn wait_until<F, Fut>(timeout: Duration, mut f: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
