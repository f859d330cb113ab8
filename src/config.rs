use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::session::cookie_jar::SessionCookies;
use std::time::Duration;

pub const API_URL_ENV: &str = "FIELDCHECK_API_URL";

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend base URL, e.g. `https://checklists.example.com`.
    pub api_url: String,
    /// Where the credential is persisted between runs. In-memory when absent.
    #[serde(default)]
    pub credential_path: Option<PathBuf>,
    /// Where session cookies are persisted. Defaults to a sibling of
    /// `credential_path`; in-memory when neither is set.
    #[serde(default)]
    pub cookie_path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let mut cfg: Config = serde_json::from_str(&raw).context("parsing JSON")?;
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                cfg.api_url = url;
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("api_url must be an http(s) URL, got {:?}", self.api_url);
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn cookie_path(&self) -> Option<PathBuf> {
        self.cookie_path.clone().or_else(|| {
            self.credential_path
                .as_ref()
                .map(|path| path.with_extension("cookies.json"))
        })
    }

    /// Cookie jar for the configured path.
    pub fn session_cookies(&self) -> SessionCookies {
        match self.cookie_path() {
            Some(path) => SessionCookies::open(path),
            None => SessionCookies::in_memory(),
        }
    }

    /// HTTP client shared by every component. `cookies` carries the HttpOnly
    /// session cookie the refresh endpoint relies on.
    pub fn http_client(&self, cookies: &SessionCookies) -> Result<Client> {
        Client::builder()
            .cookie_provider(cookies.provider())
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()
            .context("creating HTTP client")
    }
}
