/*
 * Responsibility
 * - middleware 層の公開インターフェース
 */
pub mod auth;
pub mod http;
pub mod security_headers;
