use crate::{
    error::{DirectoryError, StoreError},
    response::ApiErrorResponse,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failure kinds that cross the public contract of the account engine.
#[derive(Error, Debug)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    StoreCorruption(String),
    #[error("{0}")]
    ExternalTool(String),
    #[error("{0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    StoreCorruption,
    ExternalTool,
    Storage,
    Unauthorized,
    Unavailable,
}

impl AccountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccountError::Validation(_) => ErrorKind::Validation,
            AccountError::Conflict(_) => ErrorKind::Conflict,
            AccountError::NotFound(_) => ErrorKind::NotFound,
            AccountError::StoreCorruption(_) => ErrorKind::StoreCorruption,
            AccountError::ExternalTool(_) => ErrorKind::ExternalTool,
            AccountError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AccountError::Validation(_) => StatusCode::BAD_REQUEST,
            AccountError::Conflict(_) => StatusCode::CONFLICT,
            AccountError::NotFound(_) => StatusCode::NOT_FOUND,
            AccountError::ExternalTool(_) => StatusCode::BAD_GATEWAY,
            AccountError::StoreCorruption(_) | AccountError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for AccountError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Corrupt { .. } => AccountError::StoreCorruption(error.to_string()),
            _ => AccountError::Storage(error.to_string()),
        }
    }
}

impl From<DirectoryError> for AccountError {
    fn from(error: DirectoryError) -> Self {
        match error {
            DirectoryError::AlreadyExists(_) => AccountError::Conflict(error.to_string()),
            _ => AccountError::ExternalTool(error.to_string()),
        }
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        ApiErrorResponse::send(self.status_code(), self.kind(), Some(self.to_string()))
    }
}
