use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Rejection returned by the gateway handlers. The wire contract only
/// carries the status; the message is for logs.
#[derive(Debug)]
pub struct RunnerError {
    pub status: StatusCode,
    pub message: String,
}

impl RunnerError {
    pub fn unauthorized(message: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for RunnerError {}

impl IntoResponse for RunnerError {
    fn into_response(self) -> Response {
        tracing::debug!(status = %self.status, message = %self.message, "request rejected");
        self.status.into_response()
    }
}
