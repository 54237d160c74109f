use crate::{error::ErrorKind, response::ApiErrorResponse};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid or missing API key")]
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiErrorResponse::send(
            StatusCode::UNAUTHORIZED,
            ErrorKind::Unauthorized,
            Some(self.to_string()),
        )
    }
}
