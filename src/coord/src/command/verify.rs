use anyhow::Result;
use clap::Parser;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::command::common::{http_client, nodes_from_db, probe_chunk};
use crate::core::meta::{ChunkPlacement, KvDb, all_file_records};
use crate::core::node::StorageNode;

#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    /// RocksDB directory of a stopped coordinator
    #[arg(long)]
    pub index: PathBuf,

    /// Replica probes in flight
    #[arg(long, default_value_t = 16)]
    pub concurrency: usize,

    /// Per-request timeout (seconds)
    #[arg(long, default_value_t = 5)]
    pub http_timeout_secs: u64,
}

#[derive(Default, Debug)]
pub struct VerifyReport {
    pub files_scanned: usize,
    pub chunks_scanned: usize,
    pub malformed_records: usize,
    pub replicas_ok: usize,
    pub replicas_missing: usize,
    pub replicas_wrong_size: usize,
    pub probe_errors: usize,
    /// Chunks with at least one bad replica but one good one.
    pub under_replicated: usize,
    /// Chunks no replica can serve; their files cannot be downloaded.
    pub lost: usize,
    pub sample_lost: Vec<(String, u64)>,
}

impl Display for VerifyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Verify report:")?;
        writeln!(f, "  Files scanned       = {}", self.files_scanned)?;
        writeln!(f, "  Chunks scanned      = {}", self.chunks_scanned)?;
        writeln!(f, "  Malformed records   = {}", self.malformed_records)?;
        writeln!(f, "  Replicas ok         = {}", self.replicas_ok)?;
        writeln!(f, "  Replicas missing    = {}", self.replicas_missing)?;
        writeln!(f, "  Replicas wrong size = {}", self.replicas_wrong_size)?;
        writeln!(f, "  Probe errors        = {}", self.probe_errors)?;
        writeln!(f, "  Under-replicated    = {}", self.under_replicated)?;
        writeln!(f, "  Lost chunks         = {}", self.lost)?;
        for (filename, chunk_index) in &self.sample_lost {
            writeln!(f, "    {} chunk {}", filename, chunk_index)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicaState {
    Ok,
    Missing,
    WrongSize,
    ProbeError,
}

pub async fn verify(args: VerifyArgs) -> Result<VerifyReport> {
    let db = KvDb::open(&args.index)?;
    let http = http_client(Duration::from_secs(args.http_timeout_secs))?;

    let nodes: HashMap<String, StorageNode> = nodes_from_db(&db)?
        .into_iter()
        .map(|n| (n.node_id.clone(), n))
        .collect();

    let mut report = VerifyReport::default();

    for record in all_file_records(&db)? {
        report.files_scanned += 1;
        if !record.is_well_formed() {
            warn!(filename = %record.filename, "malformed file record");
            report.malformed_records += 1;
        }

        for chunk in &record.chunks {
            report.chunks_scanned += 1;
            let states = probe_replicas(&http, &nodes, chunk, args.concurrency).await;

            for state in &states {
                match state {
                    ReplicaState::Ok => report.replicas_ok += 1,
                    ReplicaState::Missing => report.replicas_missing += 1,
                    ReplicaState::WrongSize => report.replicas_wrong_size += 1,
                    ReplicaState::ProbeError => report.probe_errors += 1,
                }
            }

            let healthy = states.iter().filter(|s| **s == ReplicaState::Ok).count();
            if healthy == 0 {
                warn!(filename = %record.filename, chunk_index = chunk.chunk_index, "chunk lost on every replica");
                report.lost += 1;
                if report.sample_lost.len() < 10 {
                    report.sample_lost.push((record.filename.clone(), chunk.chunk_index));
                }
            } else if healthy < states.len() {
                report.under_replicated += 1;
            }
        }
    }

    info!("{}", report);
    Ok(report)
}

async fn probe_replicas(
    http: &reqwest::Client,
    nodes: &HashMap<String, StorageNode>,
    chunk: &ChunkPlacement,
    concurrency: usize,
) -> Vec<ReplicaState> {
    stream::iter(chunk.replicas.iter())
        .map(|node_id| async move {
            let Some(node) = nodes.get(node_id) else {
                return ReplicaState::Missing;
            };
            match probe_chunk(http, node, &chunk.chunk_id).await {
                Ok(head) if !head.exists => ReplicaState::Missing,
                Ok(head) if head.size != chunk.size => ReplicaState::WrongSize,
                Ok(_) => ReplicaState::Ok,
                Err(e) => {
                    warn!(%node_id, chunk_id = %chunk.chunk_id, "probe failed: {e:#}");
                    ReplicaState::ProbeError
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}
