use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use common::schemas::{JoinRequest, JoinResponse};

use crate::store::disk_usage;

/// Registration state of this node as seen from the node itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered { node_id: String },
}

impl RegistrationState {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            RegistrationState::Registered { node_id } => Some(node_id),
            RegistrationState::Unregistered => None,
        }
    }
}

#[derive(Clone)]
pub struct AgentConfig {
    pub coordinator_url: String,
    /// Base URL announced to the coordinator.
    pub advertise_url: String,
    pub data_root: PathBuf,
    pub register_retry: Duration,
    /// `None` stops the loop once registered.
    pub liveness_interval: Option<Duration>,
    pub http: reqwest::Client,
}

pub async fn register_once(cfg: &AgentConfig) -> anyhow::Result<String> {
    let (used, cap) = match disk_usage(&cfg.data_root) {
        Ok(v) => v,
        Err(e) => {
            warn!("disk_usage error: {e:#}");
            (None, None)
        }
    };

    let payload = JoinRequest {
        address: cfg.advertise_url.clone(),
        capacity_bytes: cap,
        used_bytes: used,
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    let url = format!("{}/admin/join", cfg.coordinator_url.trim_end_matches('/'));
    let resp = cfg.http.post(url).json(&payload).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("join failed: {}", resp.status());
    }

    let joined: JoinResponse = resp.json().await.context("decoding join response")?;
    Ok(joined.node_id)
}

pub async fn probe_liveness(cfg: &AgentConfig) -> anyhow::Result<()> {
    let url = format!("{}/admin/health", cfg.coordinator_url.trim_end_matches('/'));
    let resp = cfg.http.get(url).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("liveness probe: {}", resp.status());
    }
    Ok(())
}

/// Drives `Unregistered -> Registered` by retrying the join with a fixed
/// delay, then probes the coordinator every `liveness_interval`. A failed
/// probe drops back to `Unregistered`, from which only a successful join
/// leaves again.
pub async fn registration_loop(
    cfg: AgentConfig,
    state: watch::Sender<RegistrationState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        let current = state.borrow().clone();

        let wait = match current {
            RegistrationState::Unregistered => match register_once(&cfg).await {
                Ok(node_id) => {
                    info!(%node_id, coordinator = %cfg.coordinator_url, "registered");
                    state.send_replace(RegistrationState::Registered { node_id });
                    match cfg.liveness_interval {
                        Some(interval) => interval,
                        None => break,
                    }
                }
                Err(e) => {
                    warn!("registration failed, retrying in {:?}: {e:#}", cfg.register_retry);
                    cfg.register_retry
                }
            },
            RegistrationState::Registered { node_id } => {
                let Some(interval) = cfg.liveness_interval else {
                    break;
                };
                match probe_liveness(&cfg).await {
                    Ok(()) => interval,
                    Err(e) => {
                        warn!(%node_id, "coordinator unreachable: {e:#}");
                        state.send_replace(RegistrationState::Unregistered);
                        cfg.register_retry
                    }
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("registration loop stopped");

    Ok(())
}
