/// Factory: アプリの `Config` から `Authenticator` を組み立てる。
use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;

use crate::config::{Config, TokenVerification};
use crate::services::auth::authenticator::Authenticator;
use crate::services::auth::cookies::CookieSettings;
use crate::services::auth::issuer::{HttpTokenIssuer, IssuerError};
use crate::services::auth::renewal::RenewalCoordinator;
use crate::services::auth::session::SessionCipher;
use crate::services::auth::session::cipher::InvalidKey;
use crate::services::auth::verifier::{
    JwtVerifier, SignatureVerifier, UnverifiedAccess, VerifierConfigError, VerifierKey,
};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("ENCRYPTION_KEY: {0}")]
    EncryptionKey(#[from] InvalidKey),
    #[error("token verification: {0}")]
    Verifier(#[from] VerifierConfigError),
    #[error("token issuer: {0}")]
    Issuer(#[from] IssuerError),
}

pub fn build_authenticator(config: &Config) -> Result<Arc<Authenticator>, BuildError> {
    let cipher = SessionCipher::from_secret(&config.encryption_key)?;

    let verifier = build_verifier(config)?;

    let issuer = HttpTokenIssuer::new(
        config.token_endpoint.clone(),
        config.client_id.clone(),
        config.client_secret.clone(),
        config.issuer_timeout,
    )?;
    let renewal = RenewalCoordinator::new(Arc::new(issuer), config.refresh_reuse_window);

    let cookies = CookieSettings {
        access_name: config.access_cookie_name.clone(),
        session_name: config.session_cookie_name.clone(),
        secure: config.cookie_secure,
    };

    // 1 日を超える leeway は設定ミス。overflow させずに丸める
    let leeway = Duration::seconds(config.access_token_leeway_seconds.min(86_400) as i64);

    Ok(Arc::new(Authenticator::new(
        verifier, renewal, cipher, cookies, leeway,
    )))
}

fn build_verifier(config: &Config) -> Result<Arc<dyn SignatureVerifier>, BuildError> {
    let issuer = config.auth_issuer.as_deref();
    let audience = config.auth_audience.as_deref();

    let verifier: Arc<dyn SignatureVerifier> = match &config.verification {
        TokenVerification::Pem { algorithm, pem } => Arc::new(JwtVerifier::new(
            algorithm,
            VerifierKey::Pem(pem),
            issuer,
            audience,
        )?),
        TokenVerification::Secret { algorithm, secret } => Arc::new(JwtVerifier::new(
            algorithm,
            VerifierKey::Secret(secret.as_bytes()),
            issuer,
            audience,
        )?),
        TokenVerification::Skip => {
            tracing::warn!("token signature verification is disabled");
            Arc::new(UnverifiedAccess)
        }
    };

    Ok(verifier)
}
