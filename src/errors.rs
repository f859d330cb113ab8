//! Error taxonomy for calls made through the gateway.
//!
//! Every unrecovered failure is returned to the caller. The view layer (the CLI
//! here) turns it into text with [`GatewayError::user_message`].

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never produced a response (connection refused, DNS, timeout).
    #[error("no server response: {0}")]
    NoResponse(#[source] reqwest::Error),

    /// The server answered with a non-success status that the gateway does not
    /// recover from.
    #[error("request rejected with status {status}")]
    Rejected { status: u16, message: Option<String> },

    /// The session refresh failed. The credential store has been cleared.
    /// Requests that were waiting on the same refresh share its cause.
    #[error("session refresh failed: {0}")]
    Refresh(#[source] Arc<GatewayError>),

    /// No anti-forgery token could be obtained for a state-changing call.
    #[error("anti-forgery token unavailable: {0}")]
    Csrf(#[source] Box<GatewayError>),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the session is gone and the user has to log in again.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, GatewayError::Refresh(_))
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::NoResponse(_) => {
                "No Server Response. Please check your network connection.".to_string()
            }
            GatewayError::Rejected {
                message: Some(message),
                ..
            } => message.clone(),
            GatewayError::Rejected { status: 403, .. } => {
                "You do not have permission to view this data.".to_string()
            }
            GatewayError::Rejected { status, .. } => {
                format!("Request failed with status {status}. Please try again.")
            }
            GatewayError::Refresh(_) => "Your session has expired. Please log in again.".to_string(),
            GatewayError::Csrf(_) => {
                "Failed to initialize security token. Please refresh and try again.".to_string()
            }
            GatewayError::Decode(_) => "Unexpected response from server.".to_string(),
            GatewayError::InvalidRequest(msg) => msg.clone(),
            GatewayError::Internal(_) => "Unexpected error. Please try again.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_message_is_surfaced_verbatim() {
        let err = GatewayError::Rejected {
            status: 400,
            message: Some("Company name is required".to_string()),
        };
        assert_eq!(err.user_message(), "Company name is required");
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.to_string(), "request rejected with status 400");
    }

    #[test]
    fn refresh_error_marks_session_expired() {
        let inner = GatewayError::Rejected {
            status: 401,
            message: None,
        };
        let err = GatewayError::Refresh(Arc::new(inner));
        assert!(err.is_session_expired());
        assert_eq!(err.status(), None);
        assert_eq!(err.user_message(), "Your session has expired. Please log in again.");
    }

    #[test]
    fn rejected_without_message_falls_back_to_status() {
        let err = GatewayError::Rejected {
            status: 500,
            message: None,
        };
        assert_eq!(err.to_string(), "request rejected with status 500");
        assert!(err.user_message().contains("500"));
    }
}
