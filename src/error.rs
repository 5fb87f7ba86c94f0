//! Request-facing error type.
//!
//! Store and configuration plumbing return `anyhow::Result`. The ingestion
//! and query layers convert those into [`ApiError`] so the HTTP boundary can
//! tell a rejected payload from an internal failure, even though both are
//! rendered with the same status code.

use thiserror::Error;

/// Error returned by the ingestion validator and the query planner.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The client sent something we refuse to process.
    #[error("{0}")]
    BadRequest(String),

    /// Anything else: store failures, unexpected parse errors.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Shorthand for [`ApiError::BadRequest`].
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, ApiError::BadRequest(_))
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
