use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kbforge_shared::KbForgeError;
use serde_json::json;

/// A JSON `{ "error": ... }` response with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<KbForgeError> for ApiError {
    fn from(err: KbForgeError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            tracing::error!(error = %err, "request failed");
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_400() {
        let err = ApiError::from(KbForgeError::validation("invalid mode 'x'"));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("invalid mode"));
    }

    #[test]
    fn server_errors_map_to_500() {
        let err = ApiError::from(KbForgeError::Storage("redis down".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
