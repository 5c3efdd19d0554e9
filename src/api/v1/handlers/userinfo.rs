/*
 * Responsibility
 * - GET /api/v1/userinfo: このリクエストで解決された identity を返す
 */
use axum::Json;

use crate::api::v1::extractors::CurrentUser;
use crate::services::auth::UserContext;

pub async fn userinfo(CurrentUser(user): CurrentUser) -> Json<UserContext> {
    Json(user)
}
