use thiserror::Error;

use crate::services::auth::identity::MissingSubject;
use crate::services::auth::issuer::IssuerError;
use crate::services::auth::session::SessionError;
use crate::services::auth::token::TokenError;
use crate::services::auth::verifier::VerifyError;

/// リクエストを認証できなかった理由
///
/// 1 リクエストにつき報告するのは 1 つだけ (最初の hard failure)。
#[derive(Debug, Error)]
pub enum AuthError {
    /// No bearer header and no usable session cookie.
    #[error("no credential presented")]
    NoCredential,

    #[error("malformed token: {0}")]
    MalformedToken(#[from] TokenError),

    #[error(transparent)]
    MissingSubject(#[from] MissingSubject),

    /// Signature, issuer or audience check failed.
    #[error("token rejected: {0}")]
    TokenRejected(#[from] VerifyError),

    /// A bearer token has expired; there is no session to renew it from.
    #[error("access token expired")]
    TokenExpired,

    /// The session cookie failed its integrity check. The cookie is cleared.
    #[error("invalid session: {0}")]
    InvalidSession(#[from] SessionError),

    /// The refresh credential expired or was refused. Cookies are cleared.
    #[error("session expired")]
    SessionExpired,

    /// The identity provider could not be reached; the session is kept.
    #[error("token issuer unavailable: {0}")]
    IssuerUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCredential => "NO_CREDENTIAL",
            Self::MalformedToken(_) => "MALFORMED_TOKEN",
            Self::MissingSubject(_) => "MISSING_SUBJECT",
            Self::TokenRejected(_) => "TOKEN_REJECTED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::InvalidSession(_) => "INVALID_SESSION",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::IssuerUnavailable(_) => "ISSUER_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// 呼び出し側が login からやり直すべきエラー
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::NoCredential | Self::InvalidSession(_) | Self::SessionExpired
        )
    }
}

impl From<IssuerError> for AuthError {
    fn from(e: IssuerError) -> Self {
        match e {
            IssuerError::Rejected(_) => Self::SessionExpired,
            IssuerError::Unavailable(detail) => Self::IssuerUnavailable(detail),
        }
    }
}
