use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use time::Duration;

pub const DEFAULT_ACCESS_COOKIE: &str = "kc-access";
pub const DEFAULT_SESSION_COOKIE: &str = "kc-state";

/// Names and attributes of the two session cookies.
///
/// - access cookie: the current access token, as issued
/// - session cookie: the encrypted `SessionState` envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    pub access_name: String,
    pub session_name: String,
    pub secure: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            access_name: DEFAULT_ACCESS_COOKIE.to_string(),
            session_name: DEFAULT_SESSION_COOKIE.to_string(),
            secure: true,
        }
    }
}

impl CookieSettings {
    /// Set both cookies after a successful refresh. Values are stored verbatim.
    pub fn store(
        &self,
        jar: CookieJar,
        access_token: &str,
        envelope: &str,
        expire_on: DateTime<Utc>,
    ) -> CookieJar {
        let max_age = Duration::seconds((expire_on - Utc::now()).num_seconds().max(0));

        jar.add(self.build(&self.access_name, access_token, max_age))
            .add(self.build(&self.session_name, envelope, max_age))
    }

    /// Remove both cookies (only those the client actually sent are emitted).
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.remove(removal(&self.access_name))
            .remove(removal(&self.session_name))
    }

    fn build(&self, name: &str, value: &str, max_age: Duration) -> Cookie<'static> {
        Cookie::build((name.to_string(), value.to_string()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(max_age)
            .build()
    }
}

fn removal(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), "")).path("/").build()
}

/// First non-empty value of the named cookie.
pub fn value<'a>(jar: &'a CookieJar, name: &str) -> Option<&'a str> {
    jar.get(name).map(Cookie::value).filter(|v| !v.is_empty())
}
