use tracing::{info, warn};

/// Security events, emitted on the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn login_success(&self, subject_id: &str, roles: &str) {
        info!(target: "audit", event = "login_success", subject_id, roles);
    }

    pub fn login_failure(&self, email: &str, status: Option<u16>, reason: &str) {
        warn!(target: "audit", event = "login_failure", email, status = status.unwrap_or(0), reason);
    }

    pub fn token_refreshed(&self, request_id: Option<&str>, source: &str) {
        info!(target: "audit", event = "token_refreshed", request_id = request_id.unwrap_or(""), source);
    }

    pub fn refresh_failed(&self, request_id: Option<&str>, error_msg: &str) {
        warn!(target: "audit", event = "refresh_failed", request_id = request_id.unwrap_or(""), error = error_msg);
    }

    pub fn session_cleared(&self, reason: &str) {
        info!(target: "audit", event = "session_cleared", reason);
    }

    pub fn route_denied(&self, path: &str, redirect: &str) {
        warn!(target: "audit", event = "route_denied", path, redirect);
    }
}
