use axum_server::Server;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::info;

use common::file_utils::{clear_tmp_dir, init_dirs};
use common::telemetry::init_telemetry;
use common::url_utils::parse_socket_addr;

use volume::agent::{AgentConfig, RegistrationState, registration_loop};
use volume::routes::router;
use volume::state::{DurabilityLevel, VolumeState};
use volume::store::ChunkStore;

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[arg(long, default_value = "./data")]
    data: PathBuf,
    #[arg(long)]
    coordinator_url: String,
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:3001")]
    listen: String,
    /// Base URL the coordinator should use to reach this node
    #[arg(long, default_value = "http://127.0.0.1:3001")]
    advertise_url: String,
    #[arg(long, default_value_t = 1000)]
    register_retry_ms: u64,
    /// Coordinator liveness polling period; 0 disables polling
    #[arg(long, default_value_t = 2000)]
    liveness_interval_ms: u64,
    #[arg(long, default_value_t = 5)]
    http_timeout_secs: u64,
    #[arg(long, value_enum, default_value_t = DurabilityLevel::Immediate)]
    durability: DurabilityLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("volume");

    let args = Args::parse();
    init_dirs(&args.data).await?;
    let removed = clear_tmp_dir(&args.data).await?;
    if removed > 0 {
        info!(removed, "removed stale staged files");
    }

    let http = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .timeout(Duration::from_secs(args.http_timeout_secs))
        .build()?;

    let agent = AgentConfig {
        coordinator_url: args.coordinator_url.clone(),
        advertise_url: args.advertise_url.clone(),
        data_root: args.data.clone(),
        register_retry: Duration::from_millis(args.register_retry_ms),
        liveness_interval: (args.liveness_interval_ms > 0)
            .then(|| Duration::from_millis(args.liveness_interval_ms)),
        http,
    };

    let store = ChunkStore::new(args.data.clone(), args.durability);
    let app = router(VolumeState::new(store));

    let socket_addr = parse_socket_addr(&args.listen)?;
    info!("listening on {socket_addr}, advertised as {}", args.advertise_url);
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    let (state_tx, _state_rx) = watch::channel(RegistrationState::Unregistered);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let agent_handle = tokio::spawn(registration_loop(agent, state_tx, shutdown_rx));

    // Graceful shutdown: ctrl+c
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    let _ = shutdown_tx.send(true);
    let _ = agent_handle.await;

    Ok(())
}
