/*
 * Responsibility
 * - identity provider の token endpoint とのインターフェース (refresh grant のみ)
 * - "credential が拒否された" と "provider に届かない" を区別して返す
 *   (再認証が必要かどうかは呼び出し側が判断する)
 */
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

/// Tokens returned by a successful refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    /// `None` when the provider does not rotate refresh tokens.
    pub refresh_token: Option<String>,
    /// `None` when the provider does not report the refresh token lifetime.
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("rotated", &self.refresh_token.is_some())
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssuerError {
    /// The provider refused the refresh token (expired, revoked, already used).
    #[error("refresh token rejected: {0}")]
    Rejected(String),
    /// The provider could not be reached or answered with a server fault.
    #[error("token issuer unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TokenIssuer: Send + Sync + 'static {
    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, IssuerError>;
}

/// OAuth2 `refresh_token` grant against a token endpoint.
#[derive(Clone)]
pub struct HttpTokenIssuer {
    http: reqwest::Client,
    token_endpoint: url::Url,
    client_id: String,
    client_secret: Option<String>,
}

impl std::fmt::Debug for HttpTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // client secret は出力しない
        f.debug_struct("HttpTokenIssuer")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    refresh_expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl HttpTokenIssuer {
    pub fn new(
        token_endpoint: url::Url,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, IssuerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IssuerError::Unavailable(format!("http client: {e}")))?;

        Ok(Self {
            http,
            token_endpoint,
            client_id: client_id.into(),
            client_secret,
        })
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, IssuerError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .http
            .post(self.token_endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, endpoint = %self.token_endpoint, "token endpoint unreachable");
                IssuerError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            let body: TokenEndpointResponse = response.json().await.map_err(|e| {
                warn!(error = %e, "token endpoint returned an unreadable body");
                IssuerError::Unavailable(format!("invalid token response: {e}"))
            })?;

            debug!(
                rotated = body.refresh_token.is_some(),
                refresh_expires_in = ?body.refresh_expires_in,
                "refresh grant succeeded"
            );

            let now = Utc::now();
            return Ok(IssuedTokens {
                access_token: body.access_token,
                refresh_token: body.refresh_token.filter(|t| !t.is_empty()),
                // chrono の範囲外の lifetime は「報告なし」と同じ扱い
                refresh_expires_at: body
                    .refresh_expires_in
                    .filter(|secs| *secs > 0)
                    .and_then(ChronoDuration::try_seconds)
                    .and_then(|lifetime| now.checked_add_signed(lifetime)),
            });
        }

        let detail = match response.json::<TokenEndpointError>().await {
            Ok(e) => match e.error_description {
                Some(desc) => format!("{}: {}", e.error, desc),
                None => e.error,
            },
            Err(_) => status.to_string(),
        };

        Err(classify(status, detail))
    }
}

/// 4xx は grant 自体の拒否 (RFC 6749 §5.2 は 400/401)。
/// それ以外は provider 側の問題として扱う。
fn classify(status: StatusCode, detail: String) -> IssuerError {
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        IssuerError::Rejected(detail)
    } else {
        IssuerError::Unavailable(detail)
    }
}
