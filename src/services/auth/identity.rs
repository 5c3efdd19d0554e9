/*
 * Responsibility
 * - ClaimSet -> UserContext
 * - `resource_access.<resource>.roles` を "<resource>:<role>" に平坦化
 * - realm roles は別フィールドに分け、`roles` には prefix 付きのものだけを入れる
 */
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::services::auth::claims::{ClaimSet, names};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("token has no subject claim")]
pub struct MissingSubject;

/// 1 リクエストの間だけ有効な呼び出し元の identity
///
/// - 検証済み token から作り、永続化はしない
/// - `roles` は "<resource>:<role>" 形式のみ (realm roles は `realm_roles` 側)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserContext {
    pub id: String,
    pub email: String,
    pub preferred_name: String,
    pub name: String,
    pub roles: Vec<String>,
    /// `realm_access.roles` (prefix なし)
    pub realm_roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub token: String,
}

impl UserContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Build a `UserContext` from a claim set.
///
/// 必須なのは subject だけ。それ以外は空にフォールバックする。
pub fn extract(claims: &ClaimSet) -> Result<UserContext, MissingSubject> {
    let id = claims
        .subject()
        .filter(|s| !s.is_empty())
        .ok_or(MissingSubject)?
        .to_string();

    let text = |name: &str| claims.string(name).unwrap_or_default().to_string();


    Ok(UserContext {
        id,
        email: text(names::EMAIL),
        preferred_name: text(names::PREFERRED_USERNAME),
        name: text(names::NAME),
        roles: resource_roles(claims.mapping(names::RESOURCE_ACCESS)),
        realm_roles: realm_roles(claims.mapping(names::REALM_ACCESS)),
        expires_at: claims.expires_at(),
        token: String::new(),
    })
}

/// `{"openvpn": {"roles": ["dev-vpn"]}}` -> `["openvpn:dev-vpn"]`.
///
/// A resource whose entry is not shaped like `{"roles": [..]}` contributes nothing.
fn resource_roles(resource_access: Option<&Map<String, Value>>) -> Vec<String> {
    let Some(resources) = resource_access else {
        return Vec::new();
    };

    resources
        .iter()
        .filter_map(|(resource, access)| {
            let roles = access.get(names::ROLES)?.as_array()?;
            Some(
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(move |role| format!("{resource}:{role}")),
            )
        })
        .flatten()
        .collect()
}

fn realm_roles(realm_access: Option<&Map<String, Value>>) -> Vec<String> {
    realm_access
        .and_then(|realm| realm.get(names::ROLES))
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
