use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::utils::files;

/// Identity claims carried by the bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub subject_id: String,
    #[serde(default)]
    pub role_codes: BTreeSet<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The caller's current authentication state. `Credential::default()` is the
/// signed-out state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
}

impl Credential {
    pub fn new(bearer_token: String, claims: Claims) -> Self {
        Self {
            bearer_token: Some(bearer_token),
            claims: Some(claims),
        }
    }

    pub fn is_cleared(&self) -> bool {
        self.bearer_token.is_none() && self.claims.is_none()
    }
}

/// Single source of truth for who the caller is.
///
/// Cloning yields another handle to the same store. Writes are synchronous and
/// visible to every handle and subscriber as soon as `replace` returns; the
/// last writer wins.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    state: Arc<watch::Sender<Credential>>,
    storage: Option<PathBuf>,
    last_replaced: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
}

impl CredentialStore {
    /// Store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::with_state(Credential::default(), None)
    }

    /// Store persisted at `path`. A previously saved credential is loaded;
    /// a missing or unreadable file starts signed out.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let initial = match load(&path) {
            Ok(Some(credential)) => {
                debug!(path = %path.display(), "loaded persisted credential");
                credential
            }
            Ok(None) => Credential::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable credential file");
                Credential::default()
            }
        };
        Self::with_state(initial, Some(path))
    }

    fn with_state(initial: Credential, storage: Option<PathBuf>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            state: Arc::new(tx),
            storage,
            last_replaced: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Current credential.
    pub fn read(&self) -> Credential {
        self.state.borrow().clone()
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.state.borrow().bearer_token.clone()
    }

    pub fn claims(&self) -> Option<Claims> {
        self.state.borrow().claims.clone()
    }

    /// Overwrite the credential and persist it.
    pub fn replace(&self, credential: Credential) {
        self.state.send_replace(credential);
        self.touch();
        self.persist();
    }

    /// Swap the bearer token, leaving the claims as they are.
    pub fn replace_bearer_token(&self, token: String) {
        self.state.send_modify(|credential| credential.bearer_token = Some(token));
        self.touch();
        self.persist();
    }

    pub fn clear(&self) {
        self.replace(Credential::default());
    }

    /// Receiver that observes every replacement.
    pub fn subscribe(&self) -> watch::Receiver<Credential> {
        self.state.subscribe()
    }

    /// Time of the last write made through this store.
    pub fn last_replaced(&self) -> Option<DateTime<Utc>> {
        match self.last_replaced.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn touch(&self) {
        let mut guard = match self.last_replaced.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        *guard = Some(Utc::now());
    }

    fn persist(&self) {
        let Some(path) = &self.storage else {
            return;
        };
        let credential = self.read();
        if let Err(err) = save(path, &credential) {
            warn!(path = %path.display(), error = %err, "failed to persist credential");
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn load(path: &Path) -> Result<Option<Credential>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).context("reading credential file")?;
    let credential = serde_json::from_str(&raw).context("parsing credential file")?;
    Ok(Some(credential))
}

fn save(path: &Path, credential: &Credential) -> Result<()> {
    let raw = serde_json::to_vec_pretty(credential).context("serializing credential")?;
    files::write_private(path, &raw).context("writing credential file")
}
