use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use homeserve_core::{Money, MoneyError, PolicyError, StorageError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: Money, required: Money },
    #[error("cannot {action} {entity} in status {from}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("idempotency key '{key}' was already used for {operation}")]
    IdempotencyConflict { key: String, operation: String },
    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl MarketError {
    pub fn validation(message: impl Into<String>) -> Self {
        MarketError::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        MarketError::Forbidden(message.into())
    }

    pub fn transition(entity: &'static str, from: impl ToString, action: &'static str) -> Self {
        MarketError::InvalidTransition {
            entity,
            from: from.to_string(),
            action,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            MarketError::NotFound { .. } => StatusCode::NOT_FOUND,
            MarketError::Forbidden(_) => StatusCode::FORBIDDEN,
            MarketError::Validation(_) => StatusCode::BAD_REQUEST,
            MarketError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MarketError::InvalidTransition { .. }
            | MarketError::Conflict(_)
            | MarketError::IdempotencyConflict { .. } => StatusCode::CONFLICT,
            MarketError::Storage(e) => match e {
                StorageError::NotFound { .. } | StorageError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                StorageError::AlreadyExists { .. } | StorageError::Conflict { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            MarketError::Policy(_) | MarketError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MoneyError> for MarketError {
    fn from(e: MoneyError) -> Self {
        MarketError::Validation(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
