use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::errors::GatewayError;
use crate::transport::auth_api::AuthApi;

/// Anti-forgery token as issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntiForgeryToken {
    pub value: String,
    pub fetched_at: DateTime<Utc>,
}

/// Holds the single anti-forgery token shared by all state-changing calls.
///
/// There is no client-side expiry. A token stays cached until a fetch replaces
/// it; a failed fetch leaves the previous token in place.
#[derive(Debug, Clone)]
pub struct CsrfTokenCache {
    api: AuthApi,
    token: Arc<RwLock<Option<AntiForgeryToken>>>,
}

impl CsrfTokenCache {
    pub fn new(api: AuthApi) -> Self {
        Self {
            api,
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// Cached token, if one was ever fetched.
    pub fn get(&self) -> Option<AntiForgeryToken> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Fetch a fresh token and cache it.
    pub async fn fetch(&self) -> Result<AntiForgeryToken, GatewayError> {
        let value = match self.api.fetch_csrf_token().await {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, stale_token_kept = self.get().is_some(), "anti-forgery token fetch failed");
                return Err(err);
            }
        };
        let token = AntiForgeryToken {
            value,
            fetched_at: Utc::now(),
        };
        let mut guard = match self.token.write() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        *guard = Some(token.clone());
        debug!(fetched_at = %token.fetched_at, "anti-forgery token cached");
        Ok(token)
    }

    /// Cached token, or a freshly fetched one when the cache is empty.
    pub async fn get_or_fetch(&self) -> Result<AntiForgeryToken, GatewayError> {
        match self.get() {
            Some(token) => Ok(token),
            None => self.fetch().await,
        }
    }
}
