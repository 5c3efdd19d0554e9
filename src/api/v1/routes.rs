/*
 * Responsibility
 * - v1 の URL 構造を定義
 * - v1 の route はすべて access middleware の内側に置く
 */
use axum::{Router, routing::get};

use crate::api::v1::handlers::userinfo::userinfo;
use crate::middleware::auth::access;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new().route("/userinfo", get(userinfo));
    access::apply(protected, state)
}
