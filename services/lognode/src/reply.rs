use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

/// Error body shared by every endpoint.
#[derive(Serialize)]
pub struct ErrorBody {
    pub error_message: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn error_reply(status: StatusCode, message: &str) -> ApiError {
    (status, Json(ErrorBody { error_message: message.to_string() }))
}
