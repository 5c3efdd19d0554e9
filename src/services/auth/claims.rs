/*
 * Responsibility
 * - decode 済み token の claims に対する read-only view
 * - 型付き accessor はデフォルト値ではなく `None` を返す
 *   (claim が無いのか、空なのかを呼び出し側で区別できるように)
 */
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Claim names understood by the core.
pub mod names {
    pub const SUBJECT: &str = "sub";
    pub const ISSUER: &str = "iss";
    pub const AUDIENCE: &str = "aud";
    pub const EXPIRES_AT: &str = "exp";
    pub const EMAIL: &str = "email";
    pub const NAME: &str = "name";
    pub const PREFERRED_USERNAME: &str = "preferred_username";
    pub const RESOURCE_ACCESS: &str = "resource_access";
    pub const REALM_ACCESS: &str = "realm_access";
    pub const ROLES: &str = "roles";
}

/// Claim set of a decoded token.
///
/// Values keep the shape they had in the token payload (`serde_json::Value` is the
/// tagged union of string / number / bool / mapping / sequence / null). Object key
/// order is the order of the source document; a duplicated claim name keeps the
/// last value seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimSet {
    inner: Map<String, Value>,
}

impl ClaimSet {
    pub fn new(inner: Map<String, Value>) -> Self {
        Self { inner }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inner.get(name)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn mapping(&self, name: &str) -> Option<&Map<String, Value>> {
        self.get(name).and_then(Value::as_object)
    }

    pub fn sequence(&self, name: &str) -> Option<&[Value]> {
        self.get(name).and_then(Value::as_array).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn subject(&self) -> Option<&str> {
        self.string(names::SUBJECT)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.string(names::ISSUER)
    }

    /// `aud` may be a single string or an array of strings.
    pub fn audience(&self) -> Vec<&str> {
        match self.get(names::AUDIENCE) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Expiry (`exp`) as a UTC timestamp.
    ///
    /// Accepts integer or fractional seconds, and decimal strings (some issuers
    /// serialize numeric dates as strings).
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let seconds = match self.get(names::EXPIRES_AT)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if !seconds.is_finite() {
            return None;
        }
        let whole = seconds.trunc() as i64;
        let nanos = ((seconds - seconds.trunc()) * 1e9) as u32;
        Utc.timestamp_opt(whole, nanos).single()
    }
}

impl From<Map<String, Value>> for ClaimSet {
    fn from(inner: Map<String, Value>) -> Self {
        Self::new(inner)
    }
}
