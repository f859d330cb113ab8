use anyhow::{anyhow, Context, Result};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::utils::files;

/// Cookie jar behind the shared HTTP client.
///
/// The backend keeps the long-lived session in an HttpOnly cookie, which is
/// what the refresh endpoint exchanges for a new bearer token. A jar opened
/// from a file carries that cookie from one process to the next once
/// [`SessionCookies::save`] has run.
#[derive(Debug, Clone)]
pub struct SessionCookies {
    jar: Arc<CookieStoreMutex>,
    storage: Option<PathBuf>,
}

impl SessionCookies {
    pub fn in_memory() -> Self {
        Self {
            jar: Arc::new(CookieStoreMutex::default()),
            storage: None,
        }
    }

    /// Jar persisted at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let store = match load(&path) {
            Ok(Some(store)) => store,
            Ok(None) => CookieStore::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable cookie file");
                CookieStore::default()
            }
        };
        let cookies = Self {
            jar: Arc::new(CookieStoreMutex::new(store)),
            storage: Some(path),
        };
        debug!(cookies = cookies.count(), "session cookies loaded");
        cookies
    }

    /// Handle for `reqwest::ClientBuilder::cookie_provider`.
    pub fn provider(&self) -> Arc<CookieStoreMutex> {
        Arc::clone(&self.jar)
    }

    /// Number of unexpired cookies held.
    pub fn count(&self) -> usize {
        let store = match self.jar.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        let count = store.iter_unexpired().count();
        count
    }

    /// Write the jar to its file, owner-readable only. No-op in memory.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.storage else {
            return Ok(());
        };
        let mut raw = Vec::new();
        {
            let store = match self.jar.lock() {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
            cookie_store::serde::json::save_incl_expired_and_nonpersistent(&store, &mut raw)
                .map_err(|e| anyhow!("serializing cookies: {e}"))?;
        }
        files::write_private(path, &raw).context("writing cookie file")?;
        debug!(path = %path.display(), "session cookies saved");
        Ok(())
    }
}

impl Default for SessionCookies {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn load(path: &Path) -> Result<Option<CookieStore>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).context("opening cookie file")?;
    let store = cookie_store::serde::json::load(BufReader::new(file))
        .map_err(|e| anyhow!("parsing cookie file: {e}"))?;
    Ok(Some(store))
}
