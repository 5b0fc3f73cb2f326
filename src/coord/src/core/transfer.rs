use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;

use common::constants::CHUNK_ID_HEADER;
use common::schemas::StoreAck;
use common::trace_middleware::inject_trace_context_reqwest;
use common::url_utils::encode_path_segment;

use crate::core::node::StorageNode;

#[derive(thiserror::Error, Debug)]
pub enum TransferError {
    #[error("chunk not found on node")]
    NotFound,
    #[error("transfer timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("chunk already exists on node")]
    Conflict,
    #[error("node replied {0}")]
    Status(StatusCode),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransferError {
    /// The node itself could not be reached, as opposed to answering badly.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TransferError::Timeout | TransferError::Connection(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::NotFound => "not_found",
            TransferError::Timeout => "timeout",
            TransferError::Connection(_) => "connection",
            TransferError::Conflict => "conflict",
            TransferError::Status(_) => "status",
            TransferError::Protocol(_) => "protocol",
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransferError::Timeout
        } else if e.is_decode() {
            TransferError::Protocol(e.to_string())
        } else {
            TransferError::Connection(e.to_string())
        }
    }
}

/// Single-attempt chunk operations against one storage node. Implementations
/// never retry; the orchestrators decide what a failure means.
pub trait ChunkTransfer: Clone + Send + Sync + 'static {
    fn store(
        &self,
        node: &StorageNode,
        chunk_id: &str,
        data: Bytes,
    ) -> impl Future<Output = Result<(), TransferError>> + Send;

    fn fetch(
        &self,
        node: &StorageNode,
        chunk_id: &str,
    ) -> impl Future<Output = Result<Bytes, TransferError>> + Send;

    fn delete(
        &self,
        node: &StorageNode,
        chunk_id: &str,
    ) -> impl Future<Output = Result<(), TransferError>> + Send;
}

#[derive(Clone)]
pub struct HttpTransfer {
    http: Client,
    timeout: Duration,
}

impl HttpTransfer {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    fn chunk_url(node: &StorageNode, chunk_id: &str) -> String {
        format!(
            "{}/internal/chunks/{}",
            node.address,
            encode_path_segment(chunk_id)
        )
    }
}

impl ChunkTransfer for HttpTransfer {
    async fn store(
        &self,
        node: &StorageNode,
        chunk_id: &str,
        data: Bytes,
    ) -> Result<(), TransferError> {
        let req = self
            .http
            .put(Self::chunk_url(node, chunk_id))
            .timeout(self.timeout)
            .body(data);
        let resp = inject_trace_context_reqwest(req).send().await?;

        match resp.status() {
            StatusCode::CREATED | StatusCode::OK => {}
            StatusCode::CONFLICT => return Err(TransferError::Conflict),
            st => return Err(TransferError::Status(st)),
        }

        // Acks are informational; the only requirement is a clean end of stream.
        let body = resp.text().await?;
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            let ack: StoreAck = serde_json::from_str(line)
                .map_err(|e| TransferError::Protocol(format!("bad store ack: {e}")))?;
            tracing::debug!(node_id = %node.node_id, %chunk_id, message = %ack.message, "store ack");
        }

        Ok(())
    }

    async fn fetch(&self, node: &StorageNode, chunk_id: &str) -> Result<Bytes, TransferError> {
        let req = self
            .http
            .get(Self::chunk_url(node, chunk_id))
            .timeout(self.timeout);
        let resp = inject_trace_context_reqwest(req).send().await?;

        match resp.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(TransferError::NotFound),
            st => return Err(TransferError::Status(st)),
        }

        let tagged = resp
            .headers()
            .get(CHUNK_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if tagged.as_deref() != Some(chunk_id) {
            return Err(TransferError::Protocol(format!(
                "expected chunk {chunk_id}, node tagged {tagged:?}"
            )));
        }

        let mut out = BytesMut::new();
        let mut stream = resp.bytes_stream();
        while let Some(fragment) = stream.next().await {
            out.extend_from_slice(&fragment?);
        }

        if out.is_empty() {
            return Err(TransferError::NotFound);
        }
        Ok(out.freeze())
    }

    async fn delete(&self, node: &StorageNode, chunk_id: &str) -> Result<(), TransferError> {
        let req = self
            .http
            .delete(Self::chunk_url(node, chunk_id))
            .timeout(self.timeout);
        let resp = inject_trace_context_reqwest(req).send().await?;

        match resp.status() {
            st if st.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            st => Err(TransferError::Status(st)),
        }
    }
}
