use base64::{engine::general_purpose, Engine};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::errors::GatewayError;
use crate::session::credential_store::Claims;

#[derive(Debug, Deserialize)]
struct TokenPayload {
    id: Value,
    #[serde(default)]
    roles: Vec<u16>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Read the identity claims out of a JWT access token.
///
/// The signature is not checked; the backend verifies it on every call. The
/// client only needs the subject and role codes to decide what to show.
pub fn decode_claims(token: &str) -> Result<Claims, GatewayError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_)) if !payload.is_empty() => payload,
        _ => return Err(GatewayError::Decode("access token is not a JWT".to_string())),
    };

    // tokens are base64url without padding, but tolerate padded input
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| GatewayError::Decode(format!("token payload is not base64url: {e}")))?;
    let payload: TokenPayload = serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::Decode(format!("token payload is not valid JSON: {e}")))?;

    let subject_id = match payload.id {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        other => {
            return Err(GatewayError::Decode(format!(
                "token subject has unexpected type: {other}"
            )))
        }
    };

    Ok(Claims {
        subject_id,
        role_codes: payload.roles.into_iter().collect::<BTreeSet<_>>(),
        username: payload.username,
        email: payload.email,
    })
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &Value) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.signature")
}
