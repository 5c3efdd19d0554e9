/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 * - Clone 前提で持つ (内部は Arc)
 */
use std::sync::Arc;

use crate::services::auth::Authenticator;

#[derive(Clone, Debug)]
pub struct AppState {
    pub auth: Arc<Authenticator>,
    pub login_url: Option<String>,
    pub identity_headers: bool,
}

impl AppState {
    pub fn new(auth: Arc<Authenticator>) -> Self {
        Self {
            auth,
            login_url: None,
            identity_headers: true,
        }
    }

    pub fn with_login_url(mut self, login_url: Option<String>) -> Self {
        self.login_url = login_url;
        self
    }

    pub fn with_identity_headers(mut self, enabled: bool) -> Self {
        self.identity_headers = enabled;
        self
    }
}
