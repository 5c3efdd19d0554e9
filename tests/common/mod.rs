//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde_json::{Value, json};

use session_gate::services::auth::Authenticator;
use session_gate::services::auth::cookies::CookieSettings;
use session_gate::services::auth::issuer::{IssuedTokens, IssuerError, TokenIssuer};
use session_gate::services::auth::renewal::RenewalCoordinator;
use session_gate::services::auth::session::{SessionCipher, SessionState};
use session_gate::services::auth::verifier::UnverifiedAccess;

pub const KEY: [u8; 32] = [0x42; 32];

/// Unsigned token (structurally valid; paired with `UnverifiedAccess`).
pub fn jwt(claims: Value) -> String {
    format!(
        "{}.{}.c2lnbmF0dXJl",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

pub fn access_token(sub: &str, expires_in_secs: i64) -> String {
    jwt(json!({
        "sub": sub,
        "email": format!("{sub}@example.com"),
        "preferred_username": sub,
        "exp": Utc::now().timestamp() + expires_in_secs,
    }))
}

/// Issuer double: counts calls, optionally waits, returns a fixed outcome.
pub struct FakeIssuer {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub outcome: Result<IssuedTokens, IssuerError>,
}

impl FakeIssuer {
    pub fn new(outcome: Result<IssuedTokens, IssuerError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
            outcome,
        })
    }

    pub fn issuing(sub: &str) -> Arc<Self> {
        Self::new(Ok(IssuedTokens {
            access_token: access_token(sub, 300),
            refresh_token: Some("rotated-refresh".to_string()),
            refresh_expires_at: Some(Utc::now() + chrono::Duration::hours(8)),
        }))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenIssuer for FakeIssuer {
    async fn refresh(&self, _refresh_token: &str) -> Result<IssuedTokens, IssuerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.outcome.clone()
    }
}

pub fn authenticator(issuer: Arc<FakeIssuer>) -> Authenticator {
    Authenticator::new(
        Arc::new(UnverifiedAccess),
        RenewalCoordinator::new(issuer, Duration::ZERO),
        SessionCipher::new(KEY),
        CookieSettings::default(),
        chrono::Duration::zero(),
    )
}

/// Encrypted session cookie value for `refresh_token`, valid for an hour.
pub fn session_envelope(refresh_token: &str) -> String {
    let state = SessionState::new(refresh_token, Utc::now() + chrono::Duration::hours(1));
    SessionCipher::new(KEY)
        .encode(&state)
        .expect("session encodes")
}
