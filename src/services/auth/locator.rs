/*
 * Responsibility
 * - リクエストが提示している credential を探す
 *   1. `Authorization: Bearer <token>`
 *   2. access cookie (生の access token)、renewal 用に session envelope も保持
 *   3. session cookie のみ (access token は refresh で取得する)
 * - 壊れた Authorization header はエラーではなく「無し」として扱う
 * - 読めない access cookie は捨てて session cookie を使う。
 *   session も無ければ cookie session を終了させ、ブラウザに再送させない
 */
use axum::http::{HeaderMap, header};
use axum_extra::extract::cookie::CookieJar;

use crate::services::auth::cookies::{self, CookieSettings};
use crate::services::auth::error::AuthError;
use crate::services::auth::session::{SessionCipher, SessionState};
use crate::services::auth::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Bearer,
    Cookie,
    Session,
}

#[derive(Debug, Clone)]
pub enum Credential {
    Bearer(Token),
    Cookie {
        token: Token,
        /// 生の session envelope。renewal が必要な時だけ decode する
        session: Option<String>,
    },
    Session(SessionState),
}

impl Credential {
    pub fn source(&self) -> TokenSource {
        match self {
            Self::Bearer(_) => TokenSource::Bearer,
            Self::Cookie { .. } => TokenSource::Cookie,
            Self::Session(_) => TokenSource::Session,
        }
    }

    pub fn token(&self) -> Option<&Token> {
        match self {
            Self::Bearer(token) | Self::Cookie { token, .. } => Some(token),
            Self::Session(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TokenLocator {
    cipher: SessionCipher,
    cookies: CookieSettings,
}

impl TokenLocator {
    pub fn new(cipher: SessionCipher, cookies: CookieSettings) -> Self {
        Self { cipher, cookies }
    }

    pub fn locate(&self, headers: &HeaderMap, jar: &CookieJar) -> Result<Credential, AuthError> {
        if let Some(raw) = bearer_token(headers) {
            return Ok(Credential::Bearer(Token::decode(raw)?));
        }

        let session = cookies::value(jar, &self.cookies.session_name);

        if let Some(raw) = cookies::value(jar, &self.cookies.access_name) {
            match Token::decode(raw) {
                Ok(token) => {
                    return Ok(Credential::Cookie {
                        token,
                        session: session.map(str::to_string),
                    });
                }
                Err(err) if session.is_some() => {
                    tracing::warn!(error = %err, "unreadable access cookie; falling back to session");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "unreadable access cookie without session");
                    return Err(AuthError::SessionExpired);
                }
            }
        }

        match session {
            Some(envelope) => Ok(Credential::Session(self.cipher.decode(envelope)?)),
            None => Err(AuthError::NoCredential),
        }
    }
}

/// Token from `Authorization: Bearer <token>`; scheme is case-insensitive.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
