//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps [`EscrowError`] and request failures to HTTP status codes with a
//! JSON body carrying a machine-readable code. Internal details are logged,
//! never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kicks_escrow::{EscrowError, FieldError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "NOT_DISPUTABLE").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Per-field validation errors, present only for 422 field failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// One or more fields failed validation (422). Details list each field.
    #[error("validation failed for {} field(s)", .0.len())]
    InvalidFields(Vec<FieldError>),

    /// Amount could not be parsed or combined (422).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Request body could not be parsed (422).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Caller identity missing or malformed (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller may not perform this action (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource already exists (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Status edge not allowed (409).
    #[error("{0}")]
    InvalidTransition(String),

    /// Lost a concurrent update; re-read and retry (409).
    #[error("{0}")]
    ConflictingTransition(String),

    /// Dispute policy refused (409).
    #[error("{0}")]
    NotDisputable(String),

    /// Cancellation policy refused (409).
    #[error("{0}")]
    NotCancellable(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) | Self::InvalidFields(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
            }
            Self::InvalidAmount(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_AMOUNT"),
            Self::BadRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            Self::ConflictingTransition(_) => (StatusCode::CONFLICT, "CONFLICTING_TRANSITION"),
            Self::NotDisputable(_) => (StatusCode::CONFLICT, "NOT_DISPUTABLE"),
            Self::NotCancellable(_) => (StatusCode::CONFLICT, "NOT_CANCELLABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::ConflictingTransition(_) => tracing::info!(error = %self, "concurrent update"),
            _ => {}
        }

        let details = match &self {
            Self::InvalidFields(errors) => Some(serde_json::json!({ "errors": errors })),
            _ => None,
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<EscrowError> for AppError {
    fn from(err: EscrowError) -> Self {
        match err {
            EscrowError::InvalidAmount(msg) => Self::InvalidAmount(msg),
            EscrowError::InvalidTransition { .. } => Self::InvalidTransition(err.to_string()),
            EscrowError::ConflictingTransition { .. } => {
                Self::ConflictingTransition(err.to_string())
            }
            EscrowError::ValidationFailed { errors } => Self::InvalidFields(errors),
            EscrowError::NotDisputable { reason } => Self::NotDisputable(reason),
            EscrowError::NotCancellable { reason } => Self::NotCancellable(reason),
            EscrowError::ActorNotPermitted { .. } => Self::Forbidden(err.to_string()),
            EscrowError::NotFound(order_id) => {
                Self::NotFound(format!("escrow transaction {order_id} not found"))
            }
            EscrowError::AlreadyExists(order_id) => {
                Self::Conflict(format!("escrow transaction {order_id} already exists"))
            }
            EscrowError::CorruptRecord { .. } | EscrowError::Canonicalization(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<kicks_core::ValidationError> for AppError {
    fn from(err: kicks_core::ValidationError) -> Self {
        EscrowError::from(err).into()
    }
}

impl From<kicks_core::MoneyError> for AppError {
    fn from(err: kicks_core::MoneyError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}
