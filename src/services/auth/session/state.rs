use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::auth::issuer::IssuedTokens;

/// What the encrypted session cookie carries: the refresh credential and the
/// refresh credential's own expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub refresh_token: String,
    pub expire_on: DateTime<Utc>,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // refresh token は出力しない
        f.debug_struct("SessionState")
            .field("expire_on", &self.expire_on)
            .finish_non_exhaustive()
    }
}

impl SessionState {
    pub fn new(refresh_token: impl Into<String>, expire_on: DateTime<Utc>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            expire_on,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_on <= now
    }

    /// State after a successful refresh. Issuers that do not rotate the refresh
    /// token (or do not report its lifetime) keep the previous values.
    pub fn renewed(&self, issued: &IssuedTokens) -> Self {
        Self {
            refresh_token: issued
                .refresh_token
                .clone()
                .unwrap_or_else(|| self.refresh_token.clone()),
            expire_on: issued.refresh_expires_at.unwrap_or(self.expire_on),
        }
    }
}
