use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

/// `{"status": "success", "message": ..., "data": ...}` envelope.
pub struct ApiResponse<T> {
    message: String,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(json!({
            "status": "success",
            "message": self.message,
            "data": self.data,
        }))
        .into_response()
    }
}
