use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::auth::{IssueError, VerifyError};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing, unknown or revoked credential; clients never see which.
    #[error("invalid or missing token")]
    Unauthorized,

    #[error("invalid or missing admin key")]
    AdminUnauthorized,

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("token store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Rejected(_) => AppError::Unauthorized,
            VerifyError::StoreUnavailable(msg) => AppError::StoreUnavailable(msg),
        }
    }
}

impl From<IssueError> for AppError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::UnknownAccount(account) => AppError::UnknownAccount(account),
            IssueError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_token",
                "invalid or missing token".to_string(),
            ),
            AppError::AdminUnauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_admin_key",
                "invalid or missing admin key".to_string(),
            ),
            AppError::UnknownAccount(account) => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "unknown_account",
                format!("account '{}' does not exist", account),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                msg.clone(),
            ),
            AppError::StoreUnavailable(e) => {
                tracing::error!("token store unavailable: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "internal_error",
                    "service_unavailable",
                    "service temporarily unavailable".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if matches!(self, AppError::Unauthorized) {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }

        response
    }
}
