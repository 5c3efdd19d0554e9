/*
 * Responsibility
 * - 環境変数からの設定読み込み (.env は dotenvy 経由)
 * - 設定値のバリデーション (不正なら起動失敗)
 */
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::services::auth::cookies::{DEFAULT_ACCESS_COOKIE, DEFAULT_SESSION_COOKIE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(value: Option<&str>) -> Self {
        match value.unwrap_or("development").to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// access token の署名をどう検証するか
#[derive(Clone, PartialEq, Eq)]
pub enum TokenVerification {
    /// Asymmetric algorithm with a PEM public key.
    Pem { algorithm: String, pem: String },
    /// HS* algorithm with a shared secret.
    Secret { algorithm: String, secret: String },
    /// 構造チェックのみ。production では許可しない
    Skip,
}

impl fmt::Debug for TokenVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pem { algorithm, .. } => write!(f, "Pem({algorithm})"),
            Self::Secret { algorithm, .. } => write!(f, "Secret({algorithm})"),
            Self::Skip => f.write_str("Skip"),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    // session cookie 用の 32 byte AES 鍵 (raw, hex, base64 のいずれか)
    pub encryption_key: String,

    pub verification: TokenVerification,
    pub auth_issuer: Option<String>,
    pub auth_audience: Option<String>,
    pub access_token_leeway_seconds: u64,

    pub token_endpoint: url::Url,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub issuer_timeout: Duration,
    pub refresh_reuse_window: Duration,

    pub access_cookie_name: String,
    pub session_cookie_name: String,
    pub cookie_secure: bool,

    pub login_url: Option<url::Url>,
    pub identity_headers: bool,

    pub request_timeout: Duration,
    pub request_body_limit_bytes: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 暗号鍵と client secret は出力しない
        f.debug_struct("Config")
            .field("addr", &self.addr)
            .field("app_env", &self.app_env)
            .field("verification", &self.verification)
            .field("auth_issuer", &self.auth_issuer)
            .field("auth_audience", &self.auth_audience)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("client_id", &self.client_id)
            .field("login_url", &self.login_url.as_ref().map(url::Url::as_str))
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let port: u16 = parse_or(get("PORT"), "PORT", 3000)?;
        let addr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::parse(get("APP_ENV").as_deref());

        let encryption_key = required("ENCRYPTION_KEY")?;

        let skip_verification = parse_bool(get("SKIP_TOKEN_VERIFICATION"), "SKIP_TOKEN_VERIFICATION", false)?;
        let verification = if skip_verification {
            if app_env.is_production() {
                return Err(ConfigError::Invalid("SKIP_TOKEN_VERIFICATION"));
            }
            TokenVerification::Skip
        } else {
            let algorithm = get("TOKEN_VERIFY_ALGORITHM").unwrap_or_else(|| "RS256".to_string());
            match (get("TOKEN_VERIFY_KEY_PEM"), get("TOKEN_VERIFY_SECRET")) {
                (Some(pem), _) => TokenVerification::Pem {
                    algorithm,
                    pem: pem.replace("\\n", "\n"),
                },
                (None, Some(secret)) => TokenVerification::Secret { algorithm, secret },
                (None, None) => return Err(ConfigError::Missing("TOKEN_VERIFY_KEY_PEM")),
            }
        };

        let auth_issuer = get("AUTH_ISSUER");
        let auth_audience = get("AUTH_AUDIENCE");
        let access_token_leeway_seconds =
            parse_or(get("ACCESS_TOKEN_LEEWAY_SECONDS"), "ACCESS_TOKEN_LEEWAY_SECONDS", 0)?;

        let token_endpoint = absolute_url(&required("TOKEN_ENDPOINT")?)
            .ok_or(ConfigError::Invalid("TOKEN_ENDPOINT"))?;
        let client_id = required("CLIENT_ID")?;
        let client_secret = get("CLIENT_SECRET");
        let issuer_timeout = Duration::from_secs(parse_or(
            get("ISSUER_TIMEOUT_SECONDS"),
            "ISSUER_TIMEOUT_SECONDS",
            10,
        )?);
        let refresh_reuse_window = Duration::from_secs(parse_or(
            get("REFRESH_REUSE_WINDOW_SECONDS"),
            "REFRESH_REUSE_WINDOW_SECONDS",
            10,
        )?);

        let access_cookie_name =
            get("ACCESS_COOKIE_NAME").unwrap_or_else(|| DEFAULT_ACCESS_COOKIE.to_string());
        let session_cookie_name =
            get("SESSION_COOKIE_NAME").unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());
        if access_cookie_name == session_cookie_name {
            return Err(ConfigError::Invalid("SESSION_COOKIE_NAME"));
        }
        let cookie_secure = parse_bool(get("COOKIE_SECURE"), "COOKIE_SECURE", app_env.is_production())?;

        let login_url = match get("LOGIN_URL") {
            Some(raw) => Some(absolute_url(&raw).ok_or(ConfigError::Invalid("LOGIN_URL"))?),
            None => None,
        };
        let identity_headers = parse_bool(get("IDENTITY_HEADERS"), "IDENTITY_HEADERS", true)?;

        let request_timeout = Duration::from_secs(parse_or(
            get("REQUEST_TIMEOUT_SECONDS"),
            "REQUEST_TIMEOUT_SECONDS",
            30,
        )?);
        let request_body_limit_bytes = parse_or(
            get("REQUEST_BODY_LIMIT_BYTES"),
            "REQUEST_BODY_LIMIT_BYTES",
            1024 * 1024,
        )?;

        Ok(Self {
            addr,
            app_env,
            encryption_key,
            verification,
            auth_issuer,
            auth_audience,
            access_token_leeway_seconds,
            token_endpoint,
            client_id,
            client_secret,
            issuer_timeout,
            refresh_reuse_window,
            access_cookie_name,
            session_cookie_name,
            cookie_secure,
            login_url,
            identity_headers,
            request_timeout,
            request_body_limit_bytes,
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match value.map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::Invalid(key)),
    }
}

fn absolute_url(raw: &str) -> Option<url::Url> {
    url::Url::parse(raw)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
}
