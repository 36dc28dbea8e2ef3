//! Error types.
//!
//! [`StoreError`] is returned by the backing-store traits.  [`ApiError`]
//! maps everything the HTTP layer can fail with to a status code and a
//! JSON body of the form `{"error": {"message", "details"}}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

use crate::period::PeriodError;
use crate::workflow::WorkflowError;

/// Failures reported by a backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// A uniquely keyed record already exists.
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// The record changed since it was read.
    #[error("concurrent conflict on {0}")]
    ConcurrentConflict(String),

    /// Connection, serialisation or any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to HTTP clients.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    /// The body could not be read as JSON at all.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Idempotency conflicts and duplicate base filings.
    #[error("{0}")]
    Conflict(String),

    /// Malformed or missing fields in a mutation payload.
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Internal { message: String, details: Option<String> },
}

impl ApiError {
    pub fn internal(message: impl Into<String>, details: impl ToString) -> Self {
        ApiError::Internal {
            message: message.into(),
            details: Some(details.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The JSON error body.  Also what gets recorded against a failed
    /// idempotency record.
    pub fn body(&self) -> Value {
        let details = match self {
            ApiError::Internal { details, .. } => details.clone(),
            _ => None,
        };
        json!({
            "error": {
                "message": self.to_string(),
                "details": details,
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal { message, details } = &self {
            tracing::error!(%message, ?details, "request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::ConcurrentConflict(what) => ApiError::Conflict(format!("{what} was modified concurrently")),
            other => ApiError::internal("Storage failure", other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<PeriodError> for ApiError {
    fn from(err: PeriodError) -> Self {
        ApiError::Validation(err.to_string())
    }
}
