use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::GatewayError;
use crate::transport::{read_json, rejection, CSRF_HEADER};

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGOUT_PATH: &str = "/api/auth/logout";
pub const CSRF_TOKEN_PATH: &str = "/api/auth/csrf-token";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsrfTokenResponse {
    csrf_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// User record returned by the login endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginUser {
    pub id: Value,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub user: LoginUser,
}

/// Client for the public auth endpoints. None of these calls carry a bearer
/// token; the refresh call relies on the session cookie held by the shared
/// `reqwest` cookie store.
#[derive(Debug, Clone)]
pub struct AuthApi {
    base_url: String,
    http_client: Client,
}

impl AuthApi {
    pub fn new(base_url: impl Into<String>, http_client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET /api/auth/csrf-token
    pub async fn fetch_csrf_token(&self) -> Result<String, GatewayError> {
        let url = self.url(CSRF_TOKEN_PATH);
        debug!(url = %url, "fetching anti-forgery token");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(GatewayError::NoResponse)?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let body: CsrfTokenResponse = read_json(response, "csrf token response").await?;
        Ok(body.csrf_token)
    }

    /// GET /api/auth/refresh. Exchanges the session cookie for a new access token.
    pub async fn refresh(&self) -> Result<String, GatewayError> {
        let url = self.url(REFRESH_PATH);
        debug!(url = %url, "refreshing access token");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(GatewayError::NoResponse)?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let body: RefreshResponse = read_json(response, "refresh response").await?;
        Ok(body.access_token)
    }

    /// POST /api/auth/login with the anti-forgery token in `X-CSRF-Token`.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        csrf_token: &str,
    ) -> Result<LoginResponse, GatewayError> {
        let url = self.url(LOGIN_PATH);
        debug!(url = %url, email = %email, "submitting login");

        let response = self
            .http_client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(CSRF_HEADER, csrf_token)
            .json(&LoginRequest { email, password })
            .send()
            .await
            .map_err(GatewayError::NoResponse)?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        read_json(response, "login response").await
    }
}
