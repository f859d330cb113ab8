pub mod auth_api;
pub mod gateway;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::GatewayError;

pub const CSRF_HEADER: &str = "x-csrf-token";

/// Description of one outbound call.
///
/// `retried` is set by the gateway before it resubmits after a refresh. A
/// request carrying the flag is never resubmitted again.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    retried: bool,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).json(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).json(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self, GatewayError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| GatewayError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| GatewayError::InvalidRequest(format!("header value for {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// State-changing methods must carry an anti-forgery token.
    pub fn requires_csrf(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }
}

/// A successful response, returned to the caller as received.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| GatewayError::Decode(format!("response body: {e}")))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Turn a non-success response into [`GatewayError::Rejected`], keeping the
/// server's `message` when it sent one.
pub(crate) async fn rejection(response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    let body = response.bytes().await.unwrap_or_default();
    let message = serde_json::from_slice::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty());
    GatewayError::Rejected { status, message }
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, GatewayError> {
    let body = response.bytes().await.map_err(GatewayError::NoResponse)?;
    serde_json::from_slice(&body).map_err(|e| GatewayError::Decode(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mutating_methods_require_csrf() {
        assert!(!RequestSpec::get("/api/data").requires_csrf());
        assert!(RequestSpec::post("/api/companies", json!({})).requires_csrf());
        assert!(RequestSpec::put("/api/companies/1", json!({})).requires_csrf());
        assert!(RequestSpec::patch("/api/companies/1", json!({})).requires_csrf());
        assert!(RequestSpec::delete("/api/companies/1").requires_csrf());
        assert!(!RequestSpec::new(Method::HEAD, "/").requires_csrf());
    }

    #[test]
    fn retry_marker_starts_unset() {
        let mut spec = RequestSpec::get("/api/data");
        assert!(!spec.is_retried());
        spec.mark_retried();
        assert!(spec.is_retried());
        assert!(spec.clone().is_retried());
    }

    #[test]
    fn invalid_header_value_is_rejected() {
        let err = RequestSpec::get("/").header("X-Test", "bad\nvalue").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[test]
    fn response_json_decodes_body() {
        let response = GatewayResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(br#"{"items":[1,2]}"#),
        };
        let value: Value = response.json().unwrap();
        assert_eq!(value["items"][1], 2);
        assert!(response.json::<Vec<u8>>().is_err());
    }
}
