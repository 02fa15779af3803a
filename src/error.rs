//! Typed status-code errors and the terminal error mapper.
//!
//! Handlers return `Result<_, ApiError>`. Each variant knows its own status
//! code and message; axum's `IntoResponse` impl is the "terminal mapper"
//! from spec.md §4.12(c). Unexpected errors (disk/S3/index failures) are
//! wrapped in [`ApiError::Internal`], logged, counted, and surfaced as a
//! generic 404 to avoid leaking internal details (spec.md §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use displaydoc::Display;

#[derive(Debug, Display, thiserror::Error)]
pub enum ApiError {
    /// Missing content
    MissingContent,
    /// Content too large
    ContentTooLarge,
    /// Rate limit exceeded
    RateLimitExceeded,
    /// Incorrect modification key
    IncorrectModificationKey,
    /// Invalid path
    InvalidPath,
    /// Unauthorized
    Unauthorized,
    /// Not Acceptable
    NotAcceptable,
    /// Unable to uncompress data
    CodecFailure,
    /// Missing content
    NotFound,
    /// Invalid path
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingContent => StatusCode::BAD_REQUEST,
            ApiError::ContentTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::IncorrectModificationKey => StatusCode::FORBIDDEN,
            ApiError::InvalidPath => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            ApiError::CodecFailure => StatusCode::NOT_FOUND,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref err) = self {
            tracing::error!(error = ?err, "unhandled error mapped to terminal response");
            crate::metrics::counter("bytebin_errors_total", 1);
        }

        (self.status(), self.to_string()).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
