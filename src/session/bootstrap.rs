use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::security::audit_log::AuditLogger;
use crate::session::claims::decode_claims;
use crate::session::credential_store::{Credential, CredentialStore};
use crate::transport::auth_api::AuthApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A bearer token was already stored; nothing was checked.
    AlreadyAuthenticated,
    /// The session cookie produced a fresh token.
    Restored,
    /// No usable session. The store is cleared.
    SignedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    NotStarted,
    /// Protected views must show a loading state, neither content nor login.
    Loading,
    Ready(BootstrapOutcome),
}

/// Silent session restore, attempted once per process before any protected
/// view is rendered.
#[derive(Debug, Clone)]
pub struct SessionBootstrap {
    api: AuthApi,
    credentials: CredentialStore,
    started: Arc<AtomicBool>,
    outcome: Arc<OnceCell<BootstrapOutcome>>,
    audit: AuditLogger,
}

impl SessionBootstrap {
    pub fn new(api: AuthApi, credentials: CredentialStore) -> Self {
        Self {
            api,
            credentials,
            started: Arc::new(AtomicBool::new(false)),
            outcome: Arc::new(OnceCell::new()),
            audit: AuditLogger::new(),
        }
    }

    pub fn phase(&self) -> BootstrapPhase {
        match self.outcome.get() {
            Some(outcome) => BootstrapPhase::Ready(*outcome),
            None if self.started.load(Ordering::Acquire) => BootstrapPhase::Loading,
            None => BootstrapPhase::NotStarted,
        }
    }

    /// Run the restore. Concurrent and later callers get the first result.
    pub async fn run(&self) -> BootstrapOutcome {
        *self
            .outcome
            .get_or_init(|| async {
                self.started.store(true, Ordering::Release);
                self.attempt().await
            })
            .await
    }

    async fn attempt(&self) -> BootstrapOutcome {
        if self.credentials.bearer_token().is_some() {
            debug!("bearer token present; skipping session restore");
            return BootstrapOutcome::AlreadyAuthenticated;
        }

        let restored = match self.api.refresh().await {
            Ok(token) => decode_claims(&token).map(|claims| (token, claims)),
            Err(err) => Err(err),
        };

        match restored {
            Ok((token, mut claims)) => {
                // keep profile fields the token does not carry
                if let Some(previous) = self.credentials.claims() {
                    claims.username = claims.username.or(previous.username);
                    claims.email = claims.email.or(previous.email);
                }
                info!(subject_id = %claims.subject_id, "session restored from refresh cookie");
                self.credentials.replace(Credential::new(token, claims));
                self.audit.token_refreshed(None, "bootstrap");
                BootstrapOutcome::Restored
            }
            Err(err) => {
                warn!(error = %err, "session restore failed; continuing signed out");
                self.credentials.clear();
                self.audit.session_cleared("no session to restore");
                BootstrapOutcome::SignedOut
            }
        }
    }
}
