/*
 * Responsibility
 * - HTTP 向けのエラー型 (AppError)
 * - IntoResponse 実装 (status + JSON error body、または login ページへの redirect)
 * - AuthError -> AppError の変換
 */
use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::auth::AuthError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Unauthorized { code: &'static str, message: String },

    /// ブラウザ向け: 401 の代わりに login ページへ redirect する
    #[error("login required")]
    LoginRequired { location: String },

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            code,
            message: message.into(),
        }
    }

    /// Map an authentication failure, redirecting to `login_url` when the
    /// failure calls for a fresh login and a login page is configured.
    pub fn from_auth(err: AuthError, login_url: Option<&str>) -> Self {
        match (login_url, err.requires_login()) {
            (Some(location), true) => Self::LoginRequired {
                location: location.to_string(),
            },
            _ => err.into(),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::IssuerUnavailable(_) => {
                Self::ServiceUnavailable("token issuer unavailable".into())
            }
            // 内部の詳細はログにだけ残す
            AuthError::Internal(_) => Self::Internal,
            other => Self::unauthorized(other.code(), other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::LoginRequired { location } => {
                return (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
            }
            AppError::Unauthorized { code, message } => (StatusCode::UNAUTHORIZED, code, message),
            AppError::ServiceUnavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                message,
            ),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                "internal server error".into(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}
