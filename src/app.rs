use anyhow::Result;
use tracing::debug;

use crate::config::Config;
use crate::security::audit_log::AuditLogger;
use crate::security::route_guard::{Decision, RouteTable};
use crate::session::bootstrap::{BootstrapOutcome, SessionBootstrap};
use crate::session::cookie_jar::SessionCookies;
use crate::session::credential_store::CredentialStore;
use crate::session::csrf::CsrfTokenCache;
use crate::session::SessionApi;
use crate::transport::auth_api::AuthApi;
use crate::transport::gateway::Gateway;

/// Every component wired to the same credential store, token cache and
/// HTTP client.
#[derive(Debug, Clone)]
pub struct App {
    pub gateway: Gateway,
    pub session: SessionApi,
    pub bootstrap: SessionBootstrap,
    pub routes: RouteTable,
    cookies: SessionCookies,
    audit: AuditLogger,
}

impl App {
    pub fn from_config(config: &Config) -> Result<Self> {
        let cookies = config.session_cookies();
        let api = AuthApi::new(config.api_url.clone(), config.http_client(&cookies)?);
        let credentials = match &config.credential_path {
            Some(path) => CredentialStore::open(path),
            None => CredentialStore::in_memory(),
        };
        Ok(Self::new(api, credentials).with_cookies(cookies))
    }

    /// App over a ready HTTP client. Its cookies stay in memory unless the jar
    /// it was built with is handed over through [`App::with_cookies`].
    pub fn new(api: AuthApi, credentials: CredentialStore) -> Self {
        let csrf = CsrfTokenCache::new(api.clone());
        let gateway = Gateway::new(api.clone(), credentials.clone(), csrf);
        Self {
            session: SessionApi::new(gateway.clone()),
            bootstrap: SessionBootstrap::new(api, credentials),
            gateway,
            routes: RouteTable::application(),
            cookies: SessionCookies::in_memory(),
            audit: AuditLogger::new(),
        }
    }

    pub fn with_cookies(mut self, cookies: SessionCookies) -> Self {
        self.cookies = cookies;
        self
    }

    /// Persist the session cookies so the next process can refresh.
    pub fn save_cookies(&self) -> Result<()> {
        self.cookies.save()
    }

    pub fn credentials(&self) -> &CredentialStore {
        self.gateway.credentials()
    }

    /// Wait for session restore, then check `path` against the route table.
    pub async fn navigate(&self, path: &str) -> (BootstrapOutcome, Decision) {
        let outcome = self.bootstrap.run().await;
        let decision = self.routes.authorize(path, &self.credentials().read());
        debug!(path = %path, ?outcome, ?decision, "navigation checked");
        if let Some(target) = decision.redirect_target() {
            self.audit.route_denied(path, target);
        }
        (outcome, decision)
    }
}
