use anyhow::anyhow;
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use std::path::PathBuf;
use tokio::fs::File;
use tracing::{info, warn};
use uuid::Uuid;

use common::constants::{ACCESS_TOKEN_HEADER, CHUNK_COUNT_HEADER};
use common::error::ApiError;
use common::file_utils::{parse_content_length, stream_to_file, tmp_path};
use common::key_utils::FileName;
use common::schemas::{JoinRequest, JoinResponse};

use crate::core::download::DownloadError;
use crate::core::meta::{FileSummary, list_file_records};
use crate::core::node::StorageNode;
use crate::core::registry::RegistryError;
use crate::core::state::CoordinatorState;
use crate::core::upload::UploadError;

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::AlreadyExists => ApiError::FileAlreadyExists,
            UploadError::ChunkUnplaceable { chunk_index } => ApiError::ChunkUnplaceable { chunk_index },
            UploadError::Io(e) => ApiError::Io(e),
            UploadError::Registry(e) => e.into(),
            UploadError::Any(e) => ApiError::Any(e),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::NotFound => ApiError::NotFound,
            DownloadError::ChunkUnavailable { chunk_index } => ApiError::ChunkUnavailable { chunk_index },
            DownloadError::Registry(e) => e.into(),
            DownloadError::Any(e) => ApiError::Any(e),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::BadAddress(e) => ApiError::BadRequest(format!("{e:#}")),
            RegistryError::Poisoned => ApiError::Any(anyhow!("node registry lock poisoned")),
            RegistryError::Store(e) => ApiError::Any(e),
        }
    }
}

/// An absent header is the empty token. A header that is not visible ASCII is
/// rejected rather than read as the empty token.
fn access_token(headers: &HeaderMap) -> Result<String, ApiError> {
    match headers.get(ACCESS_TOKEN_HEADER) {
        None => Ok(String::new()),
        Some(v) => v
            .to_str()
            .map(str::to_string)
            .map_err(|_| ApiError::BadRequest("invalid access token header".into())),
    }
}

/// Removes the staged copy of an upload body however the handler exits.
struct StagedBody {
    path: PathBuf,
}

impl Drop for StagedBody {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), "failed to remove staged upload: {e}");
        }
    }
}

// PUT /files/{filename}
/// Stages the body locally, then hands it to the upload orchestrator. The
/// staged copy outlives the FileRecord commit.
#[tracing::instrument(name = "coord.put_file", skip(ctx, headers, body), fields(filename = raw_name))]
pub async fn put_file(
    Path(raw_name): Path<String>,
    State(ctx): State<CoordinatorState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let name = FileName::parse(&raw_name)?;
    let token = access_token(&headers)?;

    if parse_content_length(&headers).is_some_and(|len| len > ctx.max_size) {
        return Err(ApiError::TooLarge);
    }

    let _permit = ctx
        .inflight
        .acquire()
        .await
        .map_err(|e| ApiError::Any(anyhow!("failed to acquire upload permit: {e}")))?;

    let staged = StagedBody {
        path: tmp_path(&ctx.data_root, &Uuid::new_v4().to_string()),
    };
    let mut file = File::create(&staged.path).await?;
    let staged_len = stream_to_file(body.into_data_stream(), &mut file, ctx.max_size).await?;
    drop(file);

    let reader = File::open(&staged.path).await?;
    let record = ctx.uploader.upload(reader, &name, &token).await?;
    drop(staged);

    info!(filename = %name.as_str(), size = staged_len, n_chunks = record.chunks.len(), "file stored");

    let mut resp_headers = HeaderMap::new();
    resp_headers.insert(CHUNK_COUNT_HEADER, HeaderValue::from(record.chunks.len()));

    Ok((StatusCode::CREATED, resp_headers, Json(record.summary())))
}

// GET /files/{filename}
#[tracing::instrument(name = "coord.get_file", skip(ctx, headers), fields(filename = raw_name))]
pub async fn get_file(
    Path(raw_name): Path<String>,
    State(ctx): State<CoordinatorState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let name = FileName::parse(&raw_name)?;
    let token = access_token(&headers)?;

    let data = ctx.downloader.download(&name, &token).await?;

    let mut resp_headers = HeaderMap::new();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );

    Ok((StatusCode::OK, resp_headers, data))
}

// GET /files
#[tracing::instrument(name = "coord.list_files", skip_all)]
pub async fn list_files(
    State(ctx): State<CoordinatorState>,
    headers: HeaderMap,
) -> Result<Json<Vec<FileSummary>>, ApiError> {
    let token = access_token(&headers)?;
    let summaries = list_file_records(&ctx.db, &token)?
        .iter()
        .map(|r| r.summary())
        .collect();
    Ok(Json(summaries))
}

// GET /admin/nodes
#[tracing::instrument(name = "coord.admin.list_nodes", skip(ctx))]
pub async fn list_nodes(State(ctx): State<CoordinatorState>) -> Result<Json<Vec<StorageNode>>, ApiError> {
    Ok(Json(ctx.registry.list()?))
}

// POST /admin/join
#[tracing::instrument(name = "coord.admin.join_node", skip(ctx), fields(address = %req.address))]
pub async fn join_node(
    State(ctx): State<CoordinatorState>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    let node = ctx.registry.register(&req)?;
    Ok(Json(JoinResponse {
        node_id: node.node_id,
    }))
}

// GET /admin/health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
