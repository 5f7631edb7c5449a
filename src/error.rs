//! 统一的 API 错误类型与转换。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    Conflict(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::Conflict(msg)
            | ApiError::Internal(msg) => msg,
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidName(_) => ApiError::BadRequest("invalid file name".into()),
            StorageError::InvalidPath => ApiError::BadRequest("invalid path".into()),
            StorageError::NotFound(_) => ApiError::NotFound("not found".into()),
            StorageError::PayloadTooLarge { limit } => {
                ApiError::PayloadTooLarge(format!("file too large (limit {limit} bytes)"))
            }
            StorageError::InvalidMetadata => {
                ApiError::BadRequest("expected a JSON object".into())
            }
            StorageError::Busy(name) => ApiError::Conflict(format!("{name} is locked")),
            StorageError::Io(err) => {
                error!(error = %err, "storage io failure");
                ApiError::Internal("storage error".into())
            }
        }
    }
}
