//! API error responses

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use mirror::{ActionError, SessionError};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Any bearer or session failure; the cause is only logged
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    /// The remote mailbox failed
    Upstream(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::Internal(error)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(error: tokio::task::JoinError) -> Self {
        ApiError::Internal(anyhow::Error::new(error).context("Blocking task failed"))
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        if error.is_unauthenticated() {
            return ApiError::Unauthorized;
        }
        match error {
            SessionError::NoRefreshToken => ApiError::Conflict(error.to_string()),
            SessionError::OAuthNotStarted => ApiError::BadRequest(error.to_string()),
            SessionError::Remote(e) => ApiError::Upstream(e.to_string()),
            SessionError::Store(e) => ApiError::Internal(e),
            other => ApiError::Internal(anyhow::anyhow!("{}", other)),
        }
    }
}

impl From<ActionError> for ApiError {
    fn from(error: ActionError) -> Self {
        match error {
            ActionError::NotAuthenticated => ApiError::Unauthorized,
            ActionError::Delivery(e) => ApiError::Upstream(e.to_string()),
            ActionError::Store(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired session".to_string(),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(json!({"error": {
                "code": status.as_u16(),
                "message": message
            }})),
        )
            .into_response()
    }
}
