//! Error kinds and their translation to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Failure while reading the reference record directory.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot read vectors directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid embedding in {path}: {reason}")]
    InvalidEmbedding { path: PathBuf, reason: String },
}

/// Failure while turning image bytes into match results.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("face analysis failed: {0:#}")]
    Analyzer(anyhow::Error),
}

/// Every way a request can fail, each with exactly one status code.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ProcessError> for ServiceError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::InvalidImage(_) => Self::InvalidInput(err.to_string()),
            ProcessError::Analyzer(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        match status {
            StatusCode::INTERNAL_SERVER_ERROR => log::error!("request failed: {}", self),
            _ => log::warn!("request rejected ({}): {}", status.as_u16(), self),
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
