/*
 * Responsibility
 * - SessionState <-> 不透明な cookie 値
 * - AES-256-GCM、encode ごとに新しい random nonce
 * - Envelope: base64url-no-pad( nonce(12) || ciphertext || tag(16) )
 *
 * Notes
 * - decode は parse の前に認証し、おかしなものは全て失敗にする
 */
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, OsRng, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};

use crate::services::auth::session::SessionState;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session envelope is not valid base64url")]
    Encoding,
    #[error("session envelope is truncated")]
    Truncated,
    #[error("session envelope failed authentication")]
    Authentication,
    #[error("session payload is malformed")]
    Payload,
    #[error("failed to seal session: {0}")]
    Seal(String),
}

#[derive(Debug, thiserror::Error)]
#[error("encryption key must be {KEY_LEN} bytes (raw, hex, base64 or base64url)")]
pub struct InvalidKey;

/// Process-wide session cipher. Cheap to clone; the key is shared read-only.
#[derive(Clone)]
pub struct SessionCipher {
    cipher: Arc<Aes256Gcm>,
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 鍵素材は出力しない
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

impl SessionCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            cipher: Arc::new(Aes256Gcm::new((&key).into())),
        }
    }

    /// Parse key material from configuration.
    pub fn from_secret(secret: &str) -> Result<Self, InvalidKey> {
        parse_key(secret).map(Self::new)
    }

    pub fn encode(&self, state: &SessionState) -> Result<String, SessionError> {
        let payload = serde_json::to_vec(state).map_err(|e| SessionError::Seal(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_ref())
            .map_err(|e| SessionError::Seal(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    pub fn decode(&self, envelope: &str) -> Result<SessionState, SessionError> {
        let raw = URL_SAFE_NO_PAD
            .decode(envelope)
            .map_err(|_| SessionError::Encoding)?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(SessionError::Truncated);
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SessionError::Authentication)?;

        serde_json::from_slice(&plaintext).map_err(|_| SessionError::Payload)
    }
}

fn parse_key(secret: &str) -> Result<[u8; KEY_LEN], InvalidKey> {
    let value = secret.trim();

    let candidates = [
        hex_decode(value),
        STANDARD.decode(value).ok(),
        URL_SAFE.decode(value).ok(),
        STANDARD_NO_PAD.decode(value).ok(),
        URL_SAFE_NO_PAD.decode(value).ok(),
        Some(value.as_bytes().to_vec()),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|candidate| candidate.len() == KEY_LEN)
        .and_then(|candidate| candidate.try_into().ok())
        .ok_or(InvalidKey)
}

fn hex_decode(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&value[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn cipher() -> SessionCipher {
        SessionCipher::new([7u8; KEY_LEN])
    }

    #[test]
    fn round_trip_preserves_token_and_expiry() {
        let state = SessionState::new("this is a fake session", Utc::now());
        let envelope = cipher().encode(&state).unwrap();

        assert!(!envelope.is_empty());
        assert_eq!(cipher().decode(&envelope).unwrap(), state);
    }

    #[test]
    fn envelope_does_not_leak_refresh_token() {
        let state = SessionState::new("plain-refresh-token", Utc::now());
        let envelope = cipher().encode(&state).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&envelope).unwrap();

        assert!(!envelope.contains("plain-refresh-token"));
        assert!(!raw.windows(5).any(|w| w == b"plain"));
    }

    #[test]
    fn same_state_encodes_differently() {
        let state = SessionState::new("token", Utc::now());
        let c = cipher();
        assert_ne!(c.encode(&state).unwrap(), c.encode(&state).unwrap());
    }

    #[test]
    fn any_single_character_change_fails() {
        let c = cipher();
        let envelope = c
            .encode(&SessionState::new("token", Utc::now() + Duration::hours(1)))
            .unwrap();

        for i in 0..envelope.len() {
            let mut chars: Vec<char> = envelope.chars().collect();
            chars[i] = if chars[i] == 'A' { 'B' } else { 'A' };
            let tampered: String = chars.into_iter().collect();

            assert!(c.decode(&tampered).is_err(), "position {i} was accepted");
        }
    }

    #[test]
    fn wrong_key_fails() {
        let envelope = cipher()
            .encode(&SessionState::new("token", Utc::now()))
            .unwrap();
        let other = SessionCipher::new([8u8; KEY_LEN]);

        assert!(matches!(
            other.decode(&envelope),
            Err(SessionError::Authentication)
        ));
    }

    #[test]
    fn truncated_and_garbage_input_fail() {
        let c = cipher();
        assert!(matches!(c.decode(""), Err(SessionError::Truncated)));
        assert!(matches!(c.decode("AAAA"), Err(SessionError::Truncated)));
        assert!(matches!(c.decode("not base64!"), Err(SessionError::Encoding)));
    }

    #[test]
    fn authenticated_but_malformed_payload_fails() {
        let c = cipher();
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = c
            .cipher
            .encrypt(Nonce::from_slice(&nonce), b"{\"refresh_token\":1}".as_ref())
            .unwrap();
        let mut raw = nonce.to_vec();
        raw.extend_from_slice(&sealed);

        assert!(matches!(
            c.decode(&URL_SAFE_NO_PAD.encode(raw)),
            Err(SessionError::Payload)
        ));
    }

    #[test]
    fn key_material_formats() {
        let hex = "00".repeat(KEY_LEN);
        assert!(SessionCipher::from_secret(&hex).is_ok());
        assert!(SessionCipher::from_secret(&STANDARD.encode([1u8; KEY_LEN])).is_ok());
        assert!(SessionCipher::from_secret(&URL_SAFE_NO_PAD.encode([1u8; KEY_LEN])).is_ok());
        assert!(SessionCipher::from_secret("0123456789abcdefghijklmnopqrstuv").is_ok());
        assert!(SessionCipher::from_secret("too-short").is_err());
    }
}
