use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result alias used by handlers and services.
pub type ApiResult<T> = Result<T, ApiError>;

/// Application error taxonomy. Every failure a request can surface maps to
/// exactly one of these; store-level causes are logged, never leaked.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    /// Ballot arrived before the poll's window opened.
    #[error("{0}")]
    NotStarted(String),

    /// Ballot arrived after the window closed, the poll was stopped, or
    /// voting is globally paused.
    #[error("{0}")]
    Closed(String),

    #[error("Too many attempts. Try again shortly.")]
    RateLimited,

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("password hashing failed: {0}")]
    Hash(argon2::password_hash::Error),

    #[error("token error")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl ApiError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::NotStarted(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Closed(_) => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Database(_) | Self::Hash(_) | Self::Token(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotStarted(_) => "POLL_NOT_STARTED",
            Self::Closed(_) => "POLL_CLOSED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Database(_) | Self::Hash(_) | Self::Token(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
            // Generic text for 5xx; the log line carries the cause.
            "An internal error occurred. Please try again.".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

impl From<argon2::password_hash::Error> for ApiError {
    fn from(err: argon2::password_hash::Error) -> Self {
        Self::Hash(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_message() {
        let err = ApiError::Conflict("You have already voted in this poll.".into());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(err.to_string(), "You have already voted in this poll.");
    }

    #[test]
    fn store_errors_are_internal() {
        let err = ApiError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
