use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::io;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid name: empty or too long")]
    Length,
    #[error("invalid name: forbidden character")]
    Forbidden,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("conflict: file already exists")]
    FileAlreadyExists,
    #[error("conflict: chunk already exists")]
    ChunkAlreadyExists,
    #[error("not found")]
    NotFound,
    #[error("chunk {chunk_index} could not be stored on any node")]
    ChunkUnplaceable { chunk_index: u64 },
    #[error("chunk {chunk_index} is unavailable on every replica")]
    ChunkUnavailable { chunk_index: u64 },
    #[error("payload too large")]
    TooLarge,
    #[error("bad request: {0}")]
    BadKey(#[from] KeyError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::FileAlreadyExists => StatusCode::CONFLICT,
            ApiError::ChunkAlreadyExists => StatusCode::CONFLICT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::ChunkUnplaceable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ChunkUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::BadKey(_) => StatusCode::BAD_REQUEST,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Any(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
