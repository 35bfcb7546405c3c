//! JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::SinkError;

/// An error answered as `{"msg": "..."}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<SinkError> for ApiError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            SinkError::Validation(reason) => Self::new(StatusCode::BAD_REQUEST, reason),
            other => {
                error!(error = %other, "Request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "msg": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(SinkError::NotFound("part")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SinkError::Validation("bad id".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SinkError::LockPoisoned).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let encode = serde_json::from_str::<i64>("x").unwrap_err();
        assert_eq!(
            ApiError::from(SinkError::Serialization(encode)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
