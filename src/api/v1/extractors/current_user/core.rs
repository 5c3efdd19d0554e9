use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::services::auth::UserContext;

/// access middleware が request extensions に入れた呼び出し元の identity。
/// 無い場合は middleware なしで mount された route なので 401。
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserContext);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::unauthorized("NO_CREDENTIAL", "not authenticated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn missing_context_is_unauthorized() {
        let (mut parts, _) = Request::new(()).into_parts();

        let rejection = CurrentUser::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();

        assert_eq!(rejection.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn reads_context_from_extensions() {
        let (mut parts, _) = Request::new(()).into_parts();
        parts.extensions.insert(UserContext {
            id: "u-1".into(),
            email: String::new(),
            preferred_name: String::new(),
            name: String::new(),
            roles: Vec::new(),
            realm_roles: Vec::new(),
            expires_at: None,
            token: String::new(),
        });

        let CurrentUser(user) = CurrentUser::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(user.id, "u-1");
    }
}
