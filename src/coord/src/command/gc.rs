use anyhow::Result;
use clap::Parser;
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use common::time_utils::age_ms;

use crate::command::common::{http_client, list_all_chunks, nodes_from_db, probe_chunk};
use crate::core::meta::{KvDb, all_file_records};
use crate::core::transfer::{ChunkTransfer, HttpTransfer};

#[derive(Parser, Debug, Clone)]
pub struct GcArgs {
    /// RocksDB directory of a stopped coordinator
    #[arg(long)]
    pub index: PathBuf,

    /// Keep unreferenced chunks younger than this (e.g., "1h", "0s")
    #[arg(long, default_value = "1h")]
    pub min_age: String,

    /// Deletes in flight
    #[arg(long, default_value_t = 16)]
    pub concurrency: usize,

    /// Per-request timeout (seconds)
    #[arg(long, default_value_t = 5)]
    pub http_timeout_secs: u64,

    /// Dry run: report only
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Default, Debug)]
pub struct GcReport {
    pub nodes_scanned: usize,
    pub node_errors: usize,
    pub chunks_scanned: usize,
    pub orphans_found: usize,
    pub orphans_too_young: usize,
    pub orphans_deleted: usize,
    pub delete_errors: usize,
    pub sample_orphans: Vec<(String /*node*/, String /*chunk*/)>,
}

impl Display for GcReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "GC report:")?;
        writeln!(f, "  Nodes scanned      = {}", self.nodes_scanned)?;
        writeln!(f, "  Node errors        = {}", self.node_errors)?;
        writeln!(f, "  Chunks scanned     = {}", self.chunks_scanned)?;
        writeln!(f, "  Orphans found      = {}", self.orphans_found)?;
        writeln!(f, "  Orphans too young  = {}", self.orphans_too_young)?;
        writeln!(f, "  Orphans deleted    = {}", self.orphans_deleted)?;
        writeln!(f, "  Delete errors      = {}", self.delete_errors)?;
        Ok(())
    }
}

/// Deletes chunks that no FileRecord references, the leftovers of uploads
/// that never committed.
pub async fn gc(args: GcArgs) -> Result<GcReport> {
    let db = KvDb::open(&args.index)?;
    let timeout = Duration::from_secs(args.http_timeout_secs);
    let http = http_client(timeout)?;
    let transfer = HttpTransfer::new(http.clone(), timeout);
    let min_age = humantime::parse_duration(&args.min_age)?;
    let dry_run = args.dry_run;

    let referenced: HashSet<(String, String)> = all_file_records(&db)?
        .into_iter()
        .flat_map(|r| r.chunks)
        .flat_map(|c| {
            let chunk_id = c.chunk_id;
            c.replicas
                .into_iter()
                .map(move |node_id| (node_id, chunk_id.clone()))
        })
        .collect();

    let mut report = GcReport::default();

    for node in nodes_from_db(&db)? {
        let chunk_ids = match list_all_chunks(&http, &node).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(node_id = %node.node_id, "listing failed: {e:#}");
                report.node_errors += 1;
                continue;
            }
        };
        report.nodes_scanned += 1;
        report.chunks_scanned += chunk_ids.len();

        let orphans = chunk_ids
            .into_iter()
            .filter(|id| !referenced.contains(&(node.node_id.clone(), id.clone())))
            .collect::<Vec<_>>();
        report.orphans_found += orphans.len();
        for id in orphans.iter().take(10 - report.sample_orphans.len().min(10)) {
            report.sample_orphans.push((node.node_id.clone(), id.clone()));
        }

        let outcomes = stream::iter(orphans.iter())
            .map(|chunk_id| {
                let http = &http;
                let transfer = &transfer;
                let node = &node;
                async move {
                    if !min_age.is_zero() {
                        match probe_chunk(http, node, chunk_id).await {
                            Ok(head) => {
                                let old_enough = head
                                    .modified_ms
                                    .is_some_and(|m| age_ms(m) >= min_age.as_millis() as u64);
                                if !old_enough {
                                    return Outcome::TooYoung;
                                }
                            }
                            Err(e) => {
                                warn!(node_id = %node.node_id, %chunk_id, "probe failed: {e:#}");
                                return Outcome::Failed;
                            }
                        }
                    }
                    if dry_run {
                        return Outcome::Skipped;
                    }
                    match transfer.delete(node, chunk_id).await {
                        Ok(()) => Outcome::Deleted,
                        Err(e) => {
                            warn!(node_id = %node.node_id, %chunk_id, "delete failed: {e}");
                            Outcome::Failed
                        }
                    }
                }
            })
            .buffer_unordered(args.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Deleted => report.orphans_deleted += 1,
                Outcome::TooYoung => report.orphans_too_young += 1,
                Outcome::Failed => report.delete_errors += 1,
                Outcome::Skipped => {}
            }
        }
    }

    info!("{}", report);
    Ok(report)
}

enum Outcome {
    Deleted,
    TooYoung,
    Failed,
    Skipped,
}
