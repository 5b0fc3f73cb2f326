use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::info;

use common::constants::CHUNK_ID_HEADER;
use common::error::ApiError;
use common::schemas::{ChunkHead, ChunkListResponse, StoreAck};
use common::trace_middleware::trace_context_middleware;

use crate::state::VolumeState;
use crate::store::DEFAULT_PAGE_LIMIT;

pub fn router(state: VolumeState) -> Router {
    let app = Router::new()
        .route(
            "/internal/chunks/{chunk_id}",
            get(get_chunk).put(put_chunk).delete(delete_chunk),
        )
        .route("/admin/chunks", get(admin_list_chunks))
        .route("/admin/chunk", get(admin_chunk_head));

    #[cfg(feature = "fault-injection")]
    let app = {
        use crate::fault_injection::{fail_fetch, fail_store, inject_latency, kill_server, reset_faults};
        use axum::routing::post;
        app.route("/admin/fail/store", post(fail_store))
            .route("/admin/fail/fetch", post(fail_fetch))
            .route("/admin/inject/latency", post(inject_latency))
            .route("/admin/kill", post(kill_server))
            .route("/admin/reset", post(reset_faults))
    };

    app.layer(middleware::from_fn(trace_context_middleware))
        .with_state(state)
}

fn ndjson_line(message: String) -> String {
    // StoreAck always serializes; the fallback only keeps this infallible.
    let mut line = serde_json::to_string(&StoreAck { message }).unwrap_or_default();
    line.push('\n');
    line
}

// PUT /internal/chunks/{chunk_id}
#[tracing::instrument(name = "volume.put_chunk", skip(ctx, body))]
pub async fn put_chunk(
    Path(chunk_id): Path<String>,
    State(ctx): State<VolumeState>,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    ctx.fault_injector.check_killed()?;
    ctx.fault_injector.apply_latency().await;
    if ctx.fault_injector.should_fail_store() {
        return Err(ApiError::Any(anyhow::anyhow!("Fault injection: store failed")));
    }

    let size = ctx.store.put(&chunk_id, body.into_data_stream()).await?;
    info!(%chunk_id, size, "chunk stored");

    let acks = format!(
        "{}{}",
        ndjson_line(format!("received {size} bytes")),
        ndjson_line(format!("stored {chunk_id}"))
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    Ok((StatusCode::CREATED, headers, acks))
}

// GET /internal/chunks/{chunk_id}
#[tracing::instrument(name = "volume.get_chunk", skip(ctx))]
pub async fn get_chunk(
    Path(chunk_id): Path<String>,
    State(ctx): State<VolumeState>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.fault_injector.check_killed()?;
    ctx.fault_injector.apply_latency().await;
    if ctx.fault_injector.should_fail_fetch() {
        return Err(ApiError::Any(anyhow::anyhow!("Fault injection: fetch failed")));
    }

    let (file, size) = ctx.store.open(&chunk_id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CHUNK_ID_HEADER,
        HeaderValue::from_str(&chunk_id).map_err(|e| ApiError::Any(e.into()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body))
}

// DELETE /internal/chunks/{chunk_id}
#[tracing::instrument(name = "volume.delete_chunk", skip(ctx))]
pub async fn delete_chunk(
    Path(chunk_id): Path<String>,
    State(ctx): State<VolumeState>,
) -> Result<StatusCode, ApiError> {
    ctx.fault_injector.check_killed()?;

    if ctx.store.delete(&chunk_id).await? {
        info!(%chunk_id, "chunk deleted");
    }
    Ok(StatusCode::NO_CONTENT)
}

// GET /admin/chunks?limit=&after=
#[derive(Deserialize)]
pub struct ListRequest {
    pub limit: Option<usize>,
    pub after: Option<String>, // exclusive cursor
}

pub async fn admin_list_chunks(
    State(ctx): State<VolumeState>,
    Query(req): Query<ListRequest>,
) -> Result<Json<ChunkListResponse>, ApiError> {
    let limit = req.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    Ok(Json(ctx.store.list(req.after.as_deref(), limit).await?))
}

// GET /admin/chunk?id=
#[derive(Deserialize)]
pub struct ChunkRequest {
    id: String,
}

pub async fn admin_chunk_head(
    State(ctx): State<VolumeState>,
    Query(req): Query<ChunkRequest>,
) -> Result<Json<ChunkHead>, ApiError> {
    Ok(Json(ctx.store.head(&req.id).await?))
}
