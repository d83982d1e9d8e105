use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Reasons a caller is refused access to a conversation or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    NoMentorshipConnection,
    NotMessageParticipant,
}

impl ForbiddenReason {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NoMentorshipConnection => "NO_MENTORSHIP_CONNECTION",
            Self::NotMessageParticipant => "NOT_MESSAGE_PARTICIPANT",
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::NoMentorshipConnection => "You can only message users you have an accepted mentorship connection with",
            Self::NotMessageParticipant => "You can only delete messages from your own conversations",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Authentication failed")]
    AuthError,
    #[error("Forbidden: {}", .0.code())]
    Forbidden(ForbiddenReason),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Invalid request ({code}): {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Internal server error")]
    Internal,
    #[error("Internal server error: {0}")]
    InternalMsg(String),
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest { code, message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".to_string())
            }
            Self::AuthError => {
                tracing::debug!("Authentication failed");
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Unauthorized".to_string())
            }
            Self::Forbidden(reason) => {
                tracing::debug!(code = reason.code(), "Forbidden");
                (StatusCode::FORBIDDEN, reason.code(), reason.message().to_string())
            }
            Self::NotFound(what) => {
                tracing::debug!(resource = what, "Resource not found");
                (StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"))
            }
            Self::BadRequest { code, message } => {
                tracing::debug!(code, message = %message, "Bad request");
                (StatusCode::BAD_REQUEST, code, message)
            }
            Self::PayloadTooLarge => {
                tracing::debug!("Payload too large");
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", "Payload too large".to_string())
            }
            Self::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".to_string())
            }
            Self::Internal => {
                tracing::error!("Internal server error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".to_string())
            }
            Self::InternalMsg(msg) => {
                tracing::error!(error = %msg, "Internal server error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "success": false,
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_forbidden_carries_stable_code() {
        let response = AppError::Forbidden(ForbiddenReason::NoMentorshipConnection).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["error"], "NO_MENTORSHIP_CONNECTION");
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        let response = AppError::InternalMsg("connection reset by peer at 10.0.0.3".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal server error");
        assert!(!body.to_string().contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn test_bad_request_keeps_code_and_message() {
        let response = AppError::bad_request("CONTENT_REQUIRED", "Message content is required").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], "CONTENT_REQUIRED");
        assert_eq!(body["message"], "Message content is required");
    }
}
