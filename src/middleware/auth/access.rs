//! Session gate: 認証 -> `UserContext` を extensions に入れる -> 転送
//!
//! - identity は `X-Auth-*` header としても upstream に渡す。
//!   クライアントが送ってきた同名 header は先に削除する (なりすまし防止)。
//! - authenticator が決めた cookie の変更 (refresh 後の rotation、dead session の削除)
//!   はどの分岐でもレスポンスに付ける。

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::services::auth::UserContext;
use crate::state::AppState;

pub const SUBJECT_HEADER: HeaderName = HeaderName::from_static("x-auth-subject");
pub const EMAIL_HEADER: HeaderName = HeaderName::from_static("x-auth-email");
pub const USERNAME_HEADER: HeaderName = HeaderName::from_static("x-auth-username");
pub const ROLES_HEADER: HeaderName = HeaderName::from_static("x-auth-roles");

/// `router` の全 route に認証を掛ける。
///
/// 例：
/// ```ignore
/// let v1 = api::v1::routes();
/// let v1 = middleware::auth::access::apply(v1, state.clone());
/// app = app.nest("/api/v1", v1);
/// ```
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    // axum 0.8 の from_fn は State を受け取れないため、from_fn_with_state で明示的に渡す
    router.layer(middleware::from_fn_with_state(state, access_middleware))
}

async fn access_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let (jar, result) = state.auth.authenticate(req.headers()).await;

    let user = match result {
        Ok(user) => user,
        Err(err) => {
            tracing::info!(
                code = err.code(),
                error = %err,
                method = %req.method(),
                path = %req.uri().path(),
                "request not authenticated"
            );
            let err = AppError::from_auth(err, state.login_url.as_deref());
            return (jar, err).into_response();
        }
    };

    tracing::debug!(user_id = %user.id, roles = user.roles.len(), "request authenticated");

    strip_identity_headers(req.headers_mut());
    if state.identity_headers {
        insert_identity_headers(req.headers_mut(), &user);
    }

    // middleware → extractor への受け渡し
    req.extensions_mut().insert(user);

    let res = next.run(req).await;
    (jar, res).into_response()
}

fn strip_identity_headers(headers: &mut HeaderMap) {
    for name in [SUBJECT_HEADER, EMAIL_HEADER, USERNAME_HEADER, ROLES_HEADER] {
        headers.remove(name);
    }
}

fn insert_identity_headers(headers: &mut HeaderMap, user: &UserContext) {
    let values = [
        (SUBJECT_HEADER, user.id.clone()),
        (EMAIL_HEADER, user.email.clone()),
        (USERNAME_HEADER, user.preferred_name.clone()),
        (ROLES_HEADER, user.roles.join(",")),
    ];

    for (name, value) in values {
        if value.is_empty() {
            continue;
        }
        match HeaderValue::from_str(&value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(_) => tracing::debug!(header = %name, "identity value not representable as a header"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserContext {
        UserContext {
            id: "u-1".into(),
            email: "jane@example.com".into(),
            preferred_name: "jane".into(),
            name: String::new(),
            roles: vec!["api:read".into(), "api:admin".into()],
            realm_roles: Vec::new(),
            expires_at: None,
            token: "a.b.c".into(),
        }
    }

    #[test]
    fn identity_headers_replace_client_values() {
        let mut headers = HeaderMap::new();
        headers.insert(SUBJECT_HEADER, HeaderValue::from_static("spoofed"));
        headers.insert(ROLES_HEADER, HeaderValue::from_static("superuser"));

        strip_identity_headers(&mut headers);
        insert_identity_headers(&mut headers, &user());

        assert_eq!(headers.get(SUBJECT_HEADER).unwrap(), "u-1");
        assert_eq!(headers.get(EMAIL_HEADER).unwrap(), "jane@example.com");
        assert_eq!(headers.get(USERNAME_HEADER).unwrap(), "jane");
        assert_eq!(headers.get(ROLES_HEADER).unwrap(), "api:read,api:admin");
    }

    #[test]
    fn empty_values_are_omitted() {
        let mut headers = HeaderMap::new();
        let mut user = user();
        user.email.clear();
        user.roles.clear();

        insert_identity_headers(&mut headers, &user);

        assert!(headers.get(EMAIL_HEADER).is_none());
        assert!(headers.get(ROLES_HEADER).is_none());
        assert!(headers.get(SUBJECT_HEADER).is_some());
    }
}
