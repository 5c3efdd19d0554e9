/*
 * Responsibility
 * - decode 済み token の暗号学的な検証 (署名 + 任意で iss/aud)
 * - 期限切れはここでは見ない: access token の期限切れは renewal のきっかけであり、
 *   検証失敗ではない
 */
use std::str::FromStr;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::services::auth::token::Token;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("jwt verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("token algorithm {found:?} does not match expected {expected:?}")]
    AlgorithmMismatch {
        expected: Algorithm,
        found: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum VerifierConfigError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid verification key: {0}")]
    InvalidKey(String),
}

#[async_trait]
pub trait SignatureVerifier: Send + Sync + 'static {
    async fn verify(&self, token: &Token) -> Result<(), VerifyError>;
}

/// Key material for `JwtVerifier`.
pub enum VerifierKey<'a> {
    /// PEM public key (RSA, EC or Ed25519, by algorithm family).
    Pem(&'a str),
    /// Shared secret for HS* algorithms.
    Secret(&'a [u8]),
}

/// Verifies signatures with a single configured key.
#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("JwtVerifier")
            .field("validation", &self.validation)
            .finish()
    }
}

impl JwtVerifier {
    pub fn new(
        algorithm: &str,
        key: VerifierKey<'_>,
        issuer: Option<&str>,
        audience: Option<&str>,
    ) -> Result<Self, VerifierConfigError> {
        let algorithm = Algorithm::from_str(algorithm)
            .map_err(|_| VerifierConfigError::UnsupportedAlgorithm(algorithm.to_string()))?;

        let decoding_key = decoding_key(algorithm, key)?;

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        match issuer {
            Some(iss) => validation.set_issuer(&[iss]),
            None => validation.iss = None,
        }
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            decoding_key,
            validation,
        })
    }

    fn expected_algorithm(&self) -> Algorithm {
        self.validation.algorithms[0]
    }
}

fn decoding_key(algorithm: Algorithm, key: VerifierKey<'_>) -> Result<DecodingKey, VerifierConfigError> {
    use Algorithm::*;

    let invalid = |e: jsonwebtoken::errors::Error| VerifierConfigError::InvalidKey(e.to_string());

    match (algorithm, key) {
        (HS256 | HS384 | HS512, VerifierKey::Secret(secret)) => Ok(DecodingKey::from_secret(secret)),
        (RS256 | RS384 | RS512 | PS256 | PS384 | PS512, VerifierKey::Pem(pem)) => {
            DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(invalid)
        }
        (ES256 | ES384, VerifierKey::Pem(pem)) => DecodingKey::from_ec_pem(pem.as_bytes()).map_err(invalid),
        (EdDSA, VerifierKey::Pem(pem)) => DecodingKey::from_ed_pem(pem.as_bytes()).map_err(invalid),
        (alg, VerifierKey::Secret(_)) => Err(VerifierConfigError::InvalidKey(format!(
            "{alg:?} needs a PEM public key, not a shared secret"
        ))),
        (alg, VerifierKey::Pem(_)) => Err(VerifierConfigError::InvalidKey(format!(
            "{alg:?} needs a shared secret, not a PEM key"
        ))),
    }
}

#[async_trait]
impl SignatureVerifier for JwtVerifier {
    async fn verify(&self, token: &Token) -> Result<(), VerifyError> {
        let expected = self.expected_algorithm();
        let found = token.algorithm();
        if found.and_then(|a| Algorithm::from_str(a).ok()) != Some(expected) {
            return Err(VerifyError::AlgorithmMismatch {
                expected,
                found: found.map(str::to_string),
            });
        }

        jsonwebtoken::decode::<serde_json::Value>(
            token.encode(),
            &self.decoding_key,
            &self.validation,
        )?;

        Ok(())
    }
}

/// Accepts every structurally valid token.
///
/// Development only; configuration refuses it in production.
#[derive(Debug, Clone, Default)]
pub struct UnverifiedAccess;

#[async_trait]
impl SignatureVerifier for UnverifiedAccess {
    async fn verify(&self, _token: &Token) -> Result<(), VerifyError> {
        Ok(())
    }
}
