//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use outbox::OutboxError;
use saga::SagaError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// The resource exists but is not in a state that allows the action.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Outbox(#[from] OutboxError),

    #[error(transparent)]
    Saga(#[from] SagaError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Domain(err) => domain_status(err),
            ApiError::Outbox(err) => outbox_status(err),
            ApiError::Saga(err) => match err {
                SagaError::NotFound(_) => StatusCode::NOT_FOUND,
                SagaError::InvalidStatus { .. } | SagaError::WrongType { .. } => {
                    StatusCode::CONFLICT
                }
                SagaError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
                SagaError::Domain(err) => domain_status(err),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::NotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::InvalidStateTransition { .. }
        | DomainError::AlreadyExists { .. }
        | DomainError::DuplicateName { .. } => StatusCode::CONFLICT,
        DomainError::UnknownPermission(_) | DomainError::InvalidCommand(_) => {
            StatusCode::BAD_REQUEST
        }
        DomainError::FanoutExceeded { .. } | DomainError::CascadeDepthExceeded { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        DomainError::Store(err) => outbox_status(err),
        DomainError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn outbox_status(err: &OutboxError) -> StatusCode {
    match err {
        OutboxError::EnvelopeNotFound(_) => StatusCode::NOT_FOUND,
        OutboxError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        OutboxError::InvalidEnvelope(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal server error");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
