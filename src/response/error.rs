use crate::error::ErrorKind;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub struct ApiErrorResponse {
    kind: ErrorKind,
    message: Option<String>,
    code: StatusCode,
}

impl ApiErrorResponse {
    pub fn send(code: StatusCode, kind: ErrorKind, message: Option<String>) -> Response {
        ApiErrorResponse {
            kind,
            message,
            code,
        }
        .into_response()
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (
            self.code,
            Json(json!({
                "status": "error",
                "kind": self.kind,
                "message": self
                    .message
                    .unwrap_or_else(|| "Internal Server Error".to_string()),
            })),
        )
            .into_response()
    }
}
