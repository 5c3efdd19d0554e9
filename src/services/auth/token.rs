/*
 * Responsibility
 * - compact JWS (`header.payload.signature`) の構造的な decode
 * - 署名検証はここではしない: `SignatureVerifier` が受理するまで `Token` は信用しない
 */
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::services::auth::claims::ClaimSet;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("expected 3 token segments, found {0}")]
    SegmentCount(usize),
    #[error("empty {0} segment")]
    EmptySegment(&'static str),
    #[error("{0} segment is not base64url")]
    Encoding(&'static str),
    #[error("{0} segment is not a JSON object")]
    NotAnObject(&'static str),
}

/// A decoded (not yet verified) compact token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    raw: String,
    header: Map<String, Value>,
    claims: ClaimSet,
}

impl Token {
    pub fn decode(raw: &str) -> Result<Self, TokenError> {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() != 3 {
            return Err(TokenError::SegmentCount(parts.len()));
        }

        let header = decode_segment(parts[0], "header")?;
        let claims = decode_segment(parts[1], "payload")?;

        Ok(Self {
            raw: raw.to_string(),
            header,
            claims: ClaimSet::new(claims),
        })
    }

    /// The compact form exactly as it was presented.
    pub fn encode(&self) -> &str {
        &self.raw
    }

    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims.expires_at()
    }

    /// A token without a usable `exp` is treated as expired.
    pub fn is_expired(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        match self.expires_at() {
            // exp + leeway が表現可能な範囲を超えるなら、期限には到達しない
            Some(exp) => exp.checked_add_signed(leeway).is_some_and(|t| t <= now),
            None => true,
        }
    }
}

fn decode_segment(segment: &str, which: &'static str) -> Result<Map<String, Value>, TokenError> {
    // Tolerate padded producers; JWS itself is unpadded.
    let segment = segment.trim_end_matches('=');
    if segment.is_empty() {
        return Err(TokenError::EmptySegment(which));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Encoding(which))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(TokenError::NotAnObject(which)),
    }
}
