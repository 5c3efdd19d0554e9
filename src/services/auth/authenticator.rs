/*
 * Responsibility
 * - 合成されたエントリポイント: locate -> verify -> expiry -> extract / renew
 * - レスポンスに載せる cookie の差分を決める
 *   (renewal 後は差し替え、dead session は削除、それ以外は触らない)
 * - 検証に失敗した cookie の access token は捨て、session cookie があれば
 *   そこから新しい token を取り直す
 */
use std::sync::Arc;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::services::auth::cookies::CookieSettings;
use crate::services::auth::error::AuthError;
use crate::services::auth::identity::{self, UserContext};
use crate::services::auth::locator::{Credential, TokenLocator};
use crate::services::auth::renewal::RenewalCoordinator;
use crate::services::auth::session::{SessionCipher, SessionState};
use crate::services::auth::token::Token;
use crate::services::auth::verifier::SignatureVerifier;

/// refresh 後にクライアントへ返す cookie の値
struct Renewed {
    access_token: String,
    envelope: String,
    expire_on: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Authenticator {
    locator: TokenLocator,
    verifier: Arc<dyn SignatureVerifier>,
    cipher: SessionCipher,
    renewal: RenewalCoordinator,
    cookies: CookieSettings,
    leeway: Duration,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("cookies", &self.cookies)
            .field("leeway", &self.leeway)
            .field("renewal", &self.renewal)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(
        verifier: Arc<dyn SignatureVerifier>,
        renewal: RenewalCoordinator,
        cipher: SessionCipher,
        cookies: CookieSettings,
        leeway: Duration,
    ) -> Self {
        Self {
            locator: TokenLocator::new(cipher.clone(), cookies.clone()),
            verifier,
            cipher,
            renewal,
            cookies,
            leeway,
        }
    }

    pub fn cookies(&self) -> &CookieSettings {
        &self.cookies
    }

    pub fn renewal(&self) -> &RenewalCoordinator {
        &self.renewal
    }

    /// Authenticate a request.
    ///
    /// The returned jar holds only the cookie changes the response must carry.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> (CookieJar, Result<UserContext, AuthError>) {
        let jar = CookieJar::from_headers(headers);

        match self.resolve(headers, &jar).await {
            Ok((user, None)) => (jar, Ok(user)),
            Ok((user, Some(renewed))) => {
                let jar = self.cookies.store(
                    jar,
                    &renewed.access_token,
                    &renewed.envelope,
                    renewed.expire_on,
                );
                (jar, Ok(user))
            }
            Err(err) => {
                let jar = if clears_session(&err) {
                    self.cookies.clear(jar)
                } else {
                    jar
                };
                (jar, Err(err))
            }
        }
    }

    async fn resolve(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Result<(UserContext, Option<Renewed>), AuthError> {
        let now = Utc::now();

        match self.locator.locate(headers, jar)? {
            Credential::Bearer(token) => {
                self.verify(&token).await?;
                if token.is_expired(now, self.leeway) {
                    return Err(AuthError::TokenExpired);
                }
                Ok((identify(&token)?, None))
            }
            Credential::Cookie { token, session } => {
                match self.verify(&token).await {
                    Ok(()) if !token.is_expired(now, self.leeway) => {
                        return Ok((identify(&token)?, None));
                    }
                    Ok(()) => debug!("access token expired, renewing from session cookie"),
                    Err(err) if session.is_some() => {
                        debug!(error = %err, "access cookie rejected, renewing from session cookie");
                    }
                    Err(_) => return Err(AuthError::SessionExpired),
                }

                let envelope = session.ok_or(AuthError::SessionExpired)?;
                let state = self.cipher.decode(&envelope)?;
                let (user, renewed) = self.renew(state, now).await?;
                Ok((user, Some(renewed)))
            }
            Credential::Session(state) => {
                debug!("no access token presented, renewing from session cookie");
                let (user, renewed) = self.renew(state, now).await?;
                Ok((user, Some(renewed)))
            }
        }
    }

    async fn renew(
        &self,
        state: SessionState,
        now: DateTime<Utc>,
    ) -> Result<(UserContext, Renewed), AuthError> {
        if state.is_expired(now) {
            info!(expire_on = %state.expire_on, "refresh token expired");
            return Err(AuthError::SessionExpired);
        }

        let issued = self.renewal.renew(&state).await?;

        // refresh token はもう rotate 済みかもしれないので、ここで access token が
        // 使えなければ再試行の手段は残っていない
        let user = match self.admit_issued(&issued.access_token).await {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "issuer returned an unusable access token");
                return Err(AuthError::SessionExpired);
            }
        };

        let next = state.renewed(&issued);
        let envelope = self.cipher.encode(&next).map_err(|e| {
            warn!(error = %e, "failed to seal renewed session");
            AuthError::Internal(e.to_string())
        })?;

        Ok((
            user,
            Renewed {
                access_token: issued.access_token,
                envelope,
                expire_on: next.expire_on,
            },
        ))
    }

    async fn admit_issued(&self, raw: &str) -> Result<UserContext, AuthError> {
        let token = Token::decode(raw)?;
        self.verify(&token).await?;
        identify(&token)
    }

    async fn verify(&self, token: &Token) -> Result<(), AuthError> {
        self.verifier.verify(token).await.map_err(|err| {
            warn!(error = %err, "token verification failed");
            AuthError::from(err)
        })
    }
}

fn identify(token: &Token) -> Result<UserContext, AuthError> {
    let mut user = identity::extract(token.claims())?;
    user.token = token.encode().to_string();
    Ok(user)
}

fn clears_session(err: &AuthError) -> bool {
    matches!(err, AuthError::InvalidSession(_) | AuthError::SessionExpired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::issuer::{IssuedTokens, IssuerError, TokenIssuer};
    use crate::services::auth::verifier::{UnverifiedAccess, VerifyError};
    use jsonwebtoken::Algorithm;
    use async_trait::async_trait;
    use axum::http::{HeaderValue, header};
    use axum::response::IntoResponse;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedIssuer {
        calls: AtomicUsize,
        result: Result<IssuedTokens, IssuerError>,
    }

    #[async_trait]
    impl TokenIssuer for ScriptedIssuer {
        async fn refresh(&self, _refresh_token: &str) -> Result<IssuedTokens, IssuerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn jwt(sub: &str, exp: i64) -> String {
        format!(
            "{}.{}.c2ln",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{sub}","exp":{exp}}}"#))
        )
    }

    fn fresh(sub: &str) -> String {
        jwt(sub, (Utc::now() + Duration::minutes(5)).timestamp())
    }

    fn stale(sub: &str) -> String {
        jwt(sub, (Utc::now() - Duration::minutes(5)).timestamp())
    }

    /// 指定した subject の token だけ拒否する
    struct RejectSubject(&'static str);

    #[async_trait]
    impl SignatureVerifier for RejectSubject {
        async fn verify(&self, token: &Token) -> Result<(), VerifyError> {
            if token.claims().subject() == Some(self.0) {
                return Err(VerifyError::AlgorithmMismatch {
                    expected: Algorithm::RS256,
                    found: token.algorithm().map(str::to_string),
                });
            }
            Ok(())
        }
    }

    fn authenticator(
        result: Result<IssuedTokens, IssuerError>,
    ) -> (Authenticator, Arc<ScriptedIssuer>) {
        authenticator_with(Arc::new(UnverifiedAccess), result)
    }

    fn authenticator_with(
        verifier: Arc<dyn SignatureVerifier>,
        result: Result<IssuedTokens, IssuerError>,
    ) -> (Authenticator, Arc<ScriptedIssuer>) {
        let issuer = Arc::new(ScriptedIssuer {
            calls: AtomicUsize::new(0),
            result,
        });
        let auth = Authenticator::new(
            verifier,
            RenewalCoordinator::new(issuer.clone(), std::time::Duration::ZERO),
            SessionCipher::new([9u8; 32]),
            CookieSettings::default(),
            Duration::zero(),
        );
        (auth, issuer)
    }

    fn issued(access_token: String) -> Result<IssuedTokens, IssuerError> {
        Ok(IssuedTokens {
            access_token,
            refresh_token: Some("rotated-refresh".into()),
            refresh_expires_at: Some(Utc::now() + Duration::hours(8)),
        })
    }

    fn envelope(auth: &Authenticator, expire_on: DateTime<Utc>) -> String {
        auth.cipher
            .encode(&SessionState::new("refresh-1", expire_on))
            .unwrap()
    }

    fn with_cookie(cookie: String) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
        headers
    }

    fn set_cookies(jar: CookieJar) -> Vec<String> {
        (jar, ())
            .into_response()
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn valid_bearer_needs_no_cookie_changes() {
        let (auth, issuer) = authenticator(issued(fresh("unused")));
        let token = fresh("bearer-user");
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );

        let (jar, result) = auth.authenticate(&headers).await;

        let user = result.unwrap();
        assert_eq!(user.id, "bearer-user");
        assert_eq!(user.token, token);
        assert!(set_cookies(jar).is_empty());
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_bearer_is_not_renewed() {
        let (auth, issuer) = authenticator(issued(fresh("unused")));
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", stale("u"))).unwrap(),
        );

        let (_, result) = auth.authenticate(&headers).await;

        assert!(matches!(result, Err(AuthError::TokenExpired)));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_cookie_is_renewed_from_session() {
        let renewed_token = fresh("renewed-user");
        let (auth, issuer) = authenticator(issued(renewed_token.clone()));
        let state = envelope(&auth, Utc::now() + Duration::hours(1));
        let headers = with_cookie(format!("kc-access={}; kc-state={state}", stale("u")));

        let (jar, result) = auth.authenticate(&headers).await;

        let user = result.unwrap();
        assert_eq!(user.id, "renewed-user");
        assert_eq!(user.token, renewed_token);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

        let cookies = set_cookies(jar);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().any(|c| c.starts_with(&format!("kc-access={renewed_token};"))));

        let sealed = cookies
            .iter()
            .find_map(|c| c.strip_prefix("kc-state="))
            .and_then(|c| c.split(';').next())
            .unwrap();
        let next = auth.cipher.decode(sealed).unwrap();
        assert_eq!(next.refresh_token, "rotated-refresh");
    }

    #[tokio::test]
    async fn session_cookie_alone_is_renewed() {
        let (auth, issuer) = authenticator(issued(fresh("session-user")));
        let state = envelope(&auth, Utc::now() + Duration::hours(1));

        let (_, result) = auth.authenticate(&with_cookie(format!("kc-state={state}"))).await;

        assert_eq!(result.unwrap().id, "session-user");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_cookie_without_session_clears_cookies() {
        let (auth, _) = authenticator(issued(fresh("unused")));
        let headers = with_cookie(format!("kc-access={}", stale("u")));

        let (jar, result) = auth.authenticate(&headers).await;

        assert!(matches!(result, Err(AuthError::SessionExpired)));
        let cookies = set_cookies(jar);
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("kc-access=;"));
    }

    #[tokio::test]
    async fn unreadable_access_cookie_is_renewed_from_session() {
        let (auth, issuer) = authenticator(issued(fresh("renewed-user")));
        let state = envelope(&auth, Utc::now() + Duration::hours(1));
        let headers = with_cookie(format!("kc-access=garbage; kc-state={state}"));

        let (jar, result) = auth.authenticate(&headers).await;

        assert_eq!(result.unwrap().id, "renewed-user");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(set_cookies(jar).len(), 2);
    }

    #[tokio::test]
    async fn unreadable_access_cookie_alone_is_cleared() {
        let (auth, issuer) = authenticator(issued(fresh("unused")));

        let (jar, result) = auth.authenticate(&with_cookie("kc-access=garbage".into())).await;

        assert!(matches!(result, Err(AuthError::SessionExpired)));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
        let cookies = set_cookies(jar);
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("kc-access=;"));
    }

    #[tokio::test]
    async fn rejected_access_cookie_is_renewed_from_session() {
        let (auth, issuer) =
            authenticator_with(Arc::new(RejectSubject("forged")), issued(fresh("renewed-user")));
        let state = envelope(&auth, Utc::now() + Duration::hours(1));
        let headers = with_cookie(format!("kc-access={}; kc-state={state}", fresh("forged")));

        let (jar, result) = auth.authenticate(&headers).await;

        assert_eq!(result.unwrap().id, "renewed-user");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(set_cookies(jar).len(), 2);
    }

    #[tokio::test]
    async fn rejected_access_cookie_without_session_is_cleared() {
        let (auth, _) = authenticator_with(Arc::new(RejectSubject("forged")), issued(fresh("unused")));

        let (jar, result) = auth
            .authenticate(&with_cookie(format!("kc-access={}", fresh("forged"))))
            .await;

        assert!(matches!(result, Err(AuthError::SessionExpired)));
        assert_eq!(set_cookies(jar).len(), 1);
    }

    #[tokio::test]
    async fn rejected_bearer_is_still_a_hard_error() {
        let (auth, issuer) =
            authenticator_with(Arc::new(RejectSubject("forged")), issued(fresh("unused")));
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", fresh("forged"))).unwrap(),
        );

        let (jar, result) = auth.authenticate(&headers).await;

        assert!(matches!(result, Err(AuthError::TokenRejected(_))));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
        assert!(set_cookies(jar).is_empty());
    }

    #[tokio::test]
    async fn unusable_issued_token_ends_the_session() {
        let (auth, issuer) = authenticator(issued("not-a-jwt".into()));
        let state = envelope(&auth, Utc::now() + Duration::hours(1));
        let headers = with_cookie(format!("kc-access={}; kc-state={state}", stale("u")));

        let (jar, result) = auth.authenticate(&headers).await;

        assert!(matches!(result, Err(AuthError::SessionExpired)));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
        let cookies = set_cookies(jar);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("=;")));
    }

    #[tokio::test]
    async fn issued_token_without_subject_ends_the_session() {
        let no_subject = format!(
            "{}.{}.c2ln",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(r#"{"exp":4102444800}"#)
        );
        let (auth, _) = authenticator(issued(no_subject));
        let state = envelope(&auth, Utc::now() + Duration::hours(1));

        let (jar, result) = auth.authenticate(&with_cookie(format!("kc-state={state}"))).await;

        assert!(matches!(result, Err(AuthError::SessionExpired)));
        let cookies = set_cookies(jar);
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("kc-state=;"));
    }

    #[tokio::test]
    async fn expired_refresh_credential_skips_issuer() {
        let (auth, issuer) = authenticator(issued(fresh("unused")));
        let state = envelope(&auth, Utc::now() - Duration::minutes(1));

        let (jar, result) = auth.authenticate(&with_cookie(format!("kc-state={state}"))).await;

        assert!(matches!(result, Err(AuthError::SessionExpired)));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(set_cookies(jar).len(), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_ends_the_session() {
        let (auth, _) = authenticator(Err(IssuerError::Rejected("invalid_grant".into())));
        let state = envelope(&auth, Utc::now() + Duration::hours(1));
        let headers = with_cookie(format!("kc-access={}; kc-state={state}", stale("u")));

        let (jar, result) = auth.authenticate(&headers).await;

        assert!(matches!(result, Err(AuthError::SessionExpired)));
        assert_eq!(set_cookies(jar).len(), 2);
    }

    #[tokio::test]
    async fn unavailable_issuer_keeps_the_session() {
        let (auth, _) = authenticator(Err(IssuerError::Unavailable("timeout".into())));
        let state = envelope(&auth, Utc::now() + Duration::hours(1));
        let headers = with_cookie(format!("kc-access={}; kc-state={state}", stale("u")));

        let (jar, result) = auth.authenticate(&headers).await;

        assert!(matches!(result, Err(AuthError::IssuerUnavailable(_))));
        assert!(set_cookies(jar).is_empty());
    }

    #[tokio::test]
    async fn tampered_session_is_cleared() {
        let (auth, issuer) = authenticator(issued(fresh("unused")));
        let mut state = envelope(&auth, Utc::now() + Duration::hours(1));
        let flipped = if state.ends_with('A') { 'B' } else { 'A' };
        state.pop();
        state.push(flipped);

        let (jar, result) = auth.authenticate(&with_cookie(format!("kc-state={state}"))).await;

        assert!(matches!(result, Err(AuthError::InvalidSession(_))));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(set_cookies(jar).len(), 1);
    }

    #[tokio::test]
    async fn no_credential_leaves_cookies_alone() {
        let (auth, _) = authenticator(issued(fresh("unused")));
        let (jar, result) = auth.authenticate(&HeaderMap::new()).await;

        assert!(matches!(result, Err(AuthError::NoCredential)));
        assert!(set_cookies(jar).is_empty());
    }
}
