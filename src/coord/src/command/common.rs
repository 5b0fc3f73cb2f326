use anyhow::{Context, Result, bail};
use reqwest::Client;
use std::time::Duration;
use url::Url;

use common::constants::NODE_KEY_PREFIX;
use common::schemas::{ChunkHead, ChunkListResponse};

use crate::core::meta::KvDb;
use crate::core::node::StorageNode;

const LIST_PAGE_LIMIT: usize = 1000;

pub fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .build()?)
}

/// Registered nodes straight from the index; the offline commands run without
/// a coordinator.
pub fn nodes_from_db(db: &KvDb) -> Result<Vec<StorageNode>> {
    let nodes = db
        .scan_prefix::<StorageNode>(&format!("{}:", NODE_KEY_PREFIX))?
        .into_iter()
        .map(|(_, node)| node)
        .collect();
    Ok(nodes)
}

pub async fn probe_chunk(http: &Client, node: &StorageNode, chunk_id: &str) -> Result<ChunkHead> {
    let mut url = Url::parse(&node.address)
        .with_context(|| format!("bad URL for node {}: {}", node.node_id, node.address))?;
    url.set_path("/admin/chunk");
    url.query_pairs_mut().append_pair("id", chunk_id);

    let r = http.get(url).send().await?.error_for_status()?;
    Ok(r.json::<ChunkHead>().await?)
}

/// Every chunk id stored on `node`, following the paged listing to the end.
pub async fn list_all_chunks(http: &Client, node: &StorageNode) -> Result<Vec<String>> {
    let base = Url::parse(&node.address)
        .with_context(|| format!("bad URL for node {}: {}", node.node_id, node.address))?;

    let mut out = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let mut url = base.clone();
        url.set_path("/admin/chunks");
        {
            let mut qp = url.query_pairs_mut();
            qp.append_pair("limit", &LIST_PAGE_LIMIT.to_string());
            if let Some(a) = &after {
                qp.append_pair("after", a);
            }
        }

        let resp = http.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            bail!("listing {} failed: {}", url, resp.status());
        }
        let page: ChunkListResponse = resp
            .json()
            .await
            .with_context(|| format!("decode list page {}", url))?;

        out.extend(page.chunk_ids);
        after = page.next_after;
        if after.is_none() {
            break;
        }
    }
    Ok(out)
}
