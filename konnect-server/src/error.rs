use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use konnect_common::MessageResponse;
use sled::transaction::TransactionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed id: {0}")]
    InvalidId(String),

    #[error("You cannot connect with yourself")]
    SelfConnection,

    #[error("{0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("User not found")]
    UserNotFound,

    #[error("No pending connection request from this user")]
    NoSuchRequest,

    #[error("Notification not found")]
    NotificationNotFound,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Connection request already sent")]
    DuplicateRequest,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidId(_) | AppError::SelfConnection | AppError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::UserNotFound | AppError::NoSuchRequest | AppError::NotificationNotFound => {
                StatusCode::NOT_FOUND
            }
            AppError::AlreadyConnected | AppError::DuplicateRequest | AppError::EmailTaken => {
                StatusCode::CONFLICT
            }
            AppError::Storage(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// Aborts carry our own error back out; anything else came from sled itself.
impl From<TransactionError<AppError>> for AppError {
    fn from(err: TransactionError<AppError>) -> Self {
        match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => AppError::Storage(err),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::debug!("request rejected ({}): {}", status, self);
        }
        (status, Json(MessageResponse::new(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(AppError::SelfConnection.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidId("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthorized("missing token").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NoSuchRequest.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::NotificationNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::DuplicateRequest.status(), StatusCode::CONFLICT);
        assert_eq!(AppError::AlreadyConnected.status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn transaction_abort_unwraps_to_domain_error() {
        let err: AppError = TransactionError::Abort(AppError::DuplicateRequest).into();
        assert!(matches!(err, AppError::DuplicateRequest));
    }
}
