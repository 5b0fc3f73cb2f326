#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum_server::Server;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use common::file_utils::init_dirs;
use volume::routes::router;
use volume::state::{DurabilityLevel, VolumeState};
use volume::store::ChunkStore;

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

/// Serves `app` on an ephemeral loopback port.
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

pub struct TestVolume {
    pub server: Served,
    pub state: VolumeState,
    pub data_dir: TempDir,
}

impl TestVolume {
    pub async fn start() -> Result<Self> {
        let data_dir = TempDir::new()?;
        init_dirs(data_dir.path()).await?;

        let store = ChunkStore::new(data_dir.path().to_path_buf(), DurabilityLevel::Immediate);
        let state = VolumeState::new(store);
        let server = serve(router(state.clone())).await?;

        Ok(Self {
            server,
            state,
            data_dir,
        })
    }

    pub fn chunk_url(&self, chunk_id: &str) -> String {
        format!(
            "{}/internal/chunks/{}",
            self.server.url,
            common::url_utils::encode_path_segment(chunk_id)
        )
    }
}

pub fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("client")
}
