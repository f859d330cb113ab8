pub mod bootstrap;
pub mod claims;
pub mod cookie_jar;
pub mod credential_store;
pub mod csrf;

use std::collections::BTreeSet;
use tracing::warn;

use crate::errors::GatewayError;
use crate::security::audit_log::AuditLogger;
use crate::session::credential_store::{Claims, Credential};
use crate::transport::auth_api::{LoginResponse, LOGOUT_PATH};
use crate::transport::gateway::Gateway;
use crate::transport::RequestSpec;

/// Login and logout on top of the gateway's stores.
#[derive(Debug, Clone)]
pub struct SessionApi {
    gateway: Gateway,
    audit: AuditLogger,
}

impl SessionApi {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            audit: AuditLogger::new(),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Exchange email and password for a session. On success the credential
    /// store holds the new token and the returned user's claims.
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, GatewayError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "Please enter both email and password.".to_string(),
            ));
        }

        let csrf = self
            .gateway
            .csrf()
            .get_or_fetch()
            .await
            .map_err(|e| GatewayError::Csrf(Box::new(e)))?;

        match self.gateway.api().login(email, password, &csrf.value).await {
            Ok(response) => {
                let credential = credential_from_login(response);
                if let Some(claims) = &credential.claims {
                    self.audit
                        .login_success(&claims.subject_id, &format_roles(&claims.role_codes));
                }
                self.gateway.credentials().replace(credential.clone());
                Ok(credential)
            }
            Err(err) => {
                self.audit.login_failure(email, err.status(), &err.to_string());
                if err.status() == Some(403) {
                    // likely a stale anti-forgery token; have a fresh one ready
                    if let Err(csrf_err) = self.gateway.csrf().fetch().await {
                        warn!(error = %csrf_err, "could not refetch anti-forgery token after login 403");
                    }
                }
                Err(login_error(err))
            }
        }
    }

    /// End the session on the server and locally. The local credential is
    /// cleared even when the server call fails.
    pub async fn logout(&self) -> Result<(), GatewayError> {
        let result = self
            .gateway
            .send(RequestSpec::new(reqwest::Method::POST, LOGOUT_PATH))
            .await;
        self.gateway.credentials().clear();
        self.audit.session_cleared("logout");
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, "logout request failed; local session cleared anyway");
                Err(err)
            }
        }
    }
}

fn credential_from_login(response: LoginResponse) -> Credential {
    let subject_id = match response.user.id {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    };
    Credential::new(
        response.access_token,
        Claims {
            subject_id,
            role_codes: response.user.roles.into_iter().collect(),
            username: response.user.username,
            email: response.user.email,
        },
    )
}

/// Fill in the login form's messages when the server did not send one.
fn login_error(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Rejected {
            status,
            message: None,
        } => {
            let message = match status {
                400 => "Missing Email or Password.",
                401 => "Invalid credentials. Please try again.",
                403 => "Login failed due to security error. Please refresh and try again.",
                _ => "Login Failed. Please try again later.",
            };
            GatewayError::Rejected {
                status,
                message: Some(message.to_string()),
            }
        }
        other => other,
    }
}

pub(crate) fn format_roles(codes: &BTreeSet<u16>) -> String {
    codes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
