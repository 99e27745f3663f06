//! Shared application state for handlers

use crate::auth::cookies::CookieSettings;
use crate::auth::service::CredentialService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CredentialService>,
    pub cookies: CookieSettings,
}

impl AppState {
    pub fn new(service: Arc<CredentialService>, cookie_secure: bool) -> Self {
        let cookies = CookieSettings::new(
            cookie_secure,
            service.access_ttl(),
            service.refresh_ttl(),
        );
        Self { service, cookies }
    }
}
