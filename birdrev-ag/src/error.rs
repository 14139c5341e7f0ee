//! Error types for birdrev-ag
//!
//! [`ProcessingError`] covers everything that can go wrong for one
//! detection. Only repository failures cross the processing manager
//! boundary as `Err`; the rest end up in per-detection outcomes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Source recording could not be located under any root
    #[error("Source recording not found: {0}")]
    NotFound(String),

    #[error("Detection {0} not found")]
    DetectionNotFound(i64),

    /// Row exists but cannot be turned into a detection record
    #[error("Detection {id} is unusable: {reason}")]
    InvalidDetection { id: i64, reason: String },

    /// Unreadable, corrupt or unsupported audio
    #[error("Cannot read {}: {reason}", path.display())]
    SourceRead { path: PathBuf, reason: String },

    /// Invalid or out-of-bounds time interval
    #[error("Invalid time range: {0}")]
    Range(String),

    /// Destination could not be created or written
    #[error("Cannot write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },

    #[error("Cancelled before processing started")]
    Cancelled,

    /// Storage unreachable
    #[error("Repository error: {0}")]
    Repository(#[from] birdrev_common::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProcessingError {
    /// Stable identifier used in reports and API responses
    pub fn code(&self) -> &'static str {
        match self {
            ProcessingError::NotFound(_) => "NOT_FOUND",
            ProcessingError::DetectionNotFound(_) => "DETECTION_NOT_FOUND",
            ProcessingError::InvalidDetection { .. } => "INVALID_DETECTION",
            ProcessingError::SourceRead { .. } => "SOURCE_READ_ERROR",
            ProcessingError::Range(_) => "RANGE_ERROR",
            ProcessingError::Write { .. } => "WRITE_ERROR",
            ProcessingError::Cancelled => "CANCELLED",
            ProcessingError::Repository(_) => "REPOSITORY_ERROR",
            ProcessingError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Fatal errors abort the whole operation instead of one item
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProcessingError::Repository(_))
    }

    pub(crate) fn source_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ProcessingError::SourceRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ProcessingError::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("Common error: {0}")]
    Common(#[from] birdrev_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use birdrev_common::Error as CommonError;

        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Processing(ref err) => {
                let status = match err {
                    ProcessingError::DetectionNotFound(_) => StatusCode::NOT_FOUND,
                    ProcessingError::Range(_) | ProcessingError::InvalidDetection { .. } => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code(), err.to_string())
            }
            ApiError::Common(ref err) => {
                let (status, code) = match err {
                    CommonError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                    CommonError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR"),
                };
                (status, code, err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_repository_errors_are_fatal() {
        assert!(ProcessingError::Repository(birdrev_common::Error::Internal("x".into())).is_fatal());
        assert!(!ProcessingError::NotFound("a.wav".into()).is_fatal());
        assert!(!ProcessingError::Range("start >= end".into()).is_fatal());
        assert!(!ProcessingError::write("/x", "denied").is_fatal());
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ProcessingError::DetectionNotFound(3).code(), "DETECTION_NOT_FOUND");
        assert_eq!(ProcessingError::source_read("/a.wav", "bad header").code(), "SOURCE_READ_ERROR");
        assert_eq!(ProcessingError::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_api_error_status() {
        let response = ApiError::NotFound("detection 9".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response =
            ApiError::from(birdrev_common::Error::InvalidInput("bad".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from(ProcessingError::Range("x".into())).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
