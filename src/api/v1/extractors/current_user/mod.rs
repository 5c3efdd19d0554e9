/*!
 * 認証済みユーザーの extractor
 *
 * Responsibility:
 * - access middleware が解決した `UserContext` を handler に渡す
 */

mod core;

pub use core::CurrentUser;
