use axum::{
    Router,
    routing::{get, post, put},
};
use axum_server::Server;
use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use common::constants::DEFAULT_CHUNK_SIZE;
use common::file_utils::{clear_tmp_dir, init_dirs};
use common::url_utils::parse_socket_addr;

use crate::core::meta::KvDb;
use crate::core::routes::{get_file, health, join_node, list_files, list_nodes, put_file};
use crate::core::state::{CoordinatorConfig, CoordinatorState};

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Data root directory; staged uploads go to {data}/tmp
    #[arg(long, default_value = "./data")]
    data: PathBuf,

    /// RocksDB directory
    #[arg(long, default_value = "./data/index")]
    index: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Chunk size in bytes (default: 64 MiB)
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Replicas per chunk (default: every registered node)
    #[arg(long)]
    n_replicas: Option<NonZeroUsize>,

    /// Max concurrent uploads
    #[arg(long, default_value_t = 4)]
    max_inflight: usize,

    /// Max allowed file size in bytes (default: 16 GiB)
    #[arg(long, default_value_t = 16 * 1024 * 1024 * 1024u64)]
    max_size: u64,

    /// Timeout of a single chunk store/fetch/delete (seconds)
    #[arg(long, default_value_t = 60)]
    transfer_timeout_secs: u64,

    /// Chunks fetched concurrently per download
    #[arg(long, default_value_t = 4)]
    fetch_concurrency: usize,
}

impl ServeArgs {
    fn config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            data_root: self.data.clone(),
            chunk_size: self.chunk_size,
            n_replicas: self.n_replicas.map(NonZeroUsize::get),
            max_inflight: self.max_inflight,
            max_size: self.max_size,
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
            fetch_concurrency: self.fetch_concurrency,
        }
    }
}

pub fn build_router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/files", get(list_files))
        .route("/files/{filename}", put(put_file).get(get_file))
        .route("/admin/nodes", get(list_nodes))
        .route("/admin/join", post(join_node))
        .route("/admin/health", get(health))
        .with_state(state)
}

pub async fn serve(serve_args: ServeArgs) -> anyhow::Result<()> {
    init_dirs(&serve_args.data).await?;
    let cleared = clear_tmp_dir(&serve_args.data).await?;
    if cleared > 0 {
        info!(cleared, "removed staged uploads of a previous run");
    }

    let db = KvDb::open(&serve_args.index)?;
    let state = CoordinatorState::new(serve_args.config(), db)?;
    let app = build_router(state);

    let socket_addr = parse_socket_addr(&serve_args.listen)?;
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!(
        chunk_size = serve_args.chunk_size,
        n_replicas = ?serve_args.n_replicas,
        "listening on {}",
        serve_args.listen
    );

    // Graceful shutdown: ctrl+c
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    Ok(())
}
