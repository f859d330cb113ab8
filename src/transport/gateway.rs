use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::errors::GatewayError;
use crate::security::audit_log::AuditLogger;
use crate::session::credential_store::CredentialStore;
use crate::session::csrf::CsrfTokenCache;
use crate::transport::auth_api::AuthApi;
use crate::transport::{rejection, GatewayResponse, RequestSpec, CSRF_HEADER};

/// Lifecycle of one call through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Sent,
    /// First attempt got a 403; refreshing before the single resubmission.
    AuthRejected,
    Resent,
    Succeeded,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Succeeded | RequestState::Failed)
    }

    fn transmitted(self) -> Self {
        match self {
            RequestState::AuthRejected => RequestState::Resent,
            _ => RequestState::Sent,
        }
    }
}

fn transition(state: &mut RequestState, next: RequestState, request_id: &str) {
    trace!(request_id = %request_id, from = ?*state, to = ?next, "request state");
    *state = next;
}

type RefreshOutcome = Result<String, Arc<GatewayError>>;

/// Outcome of the latest gateway refresh and a counter of completed ones.
///
/// A request remembers the generation it was sent under. If a refresh
/// completed since then, the request adopts that outcome, success or failure,
/// instead of starting another one.
#[derive(Debug, Default)]
struct RefreshFlight {
    generation: AtomicU64,
    last: Mutex<Option<RefreshOutcome>>,
}

impl RefreshFlight {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Sends requests with the caller's credentials attached and recovers from an
/// expired bearer token by refreshing once and resubmitting.
///
/// The backend signals an expired token with 403. Every other failure is
/// returned to the caller untouched.
#[derive(Debug, Clone)]
pub struct Gateway {
    api: AuthApi,
    credentials: CredentialStore,
    csrf: CsrfTokenCache,
    refresh: Arc<RefreshFlight>,
    audit: AuditLogger,
}

impl Gateway {
    pub fn new(api: AuthApi, credentials: CredentialStore, csrf: CsrfTokenCache) -> Self {
        Self {
            api,
            credentials,
            csrf,
            refresh: Arc::new(RefreshFlight::default()),
            audit: AuditLogger::new(),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn csrf(&self) -> &CsrfTokenCache {
        &self.csrf
    }

    pub fn api(&self) -> &AuthApi {
        &self.api
    }

    pub async fn send(&self, spec: RequestSpec) -> Result<GatewayResponse, GatewayError> {
        self.send_tracked(spec).await.1
    }

    /// `send`, also returning the state the request ended in. Always terminal.
    pub(crate) async fn send_tracked(
        &self,
        mut spec: RequestSpec,
    ) -> (RequestState, Result<GatewayResponse, GatewayError>) {
        let request_id = Uuid::new_v4().to_string();
        let mut state = RequestState::Pending;

        let result = self.drive(&mut spec, &mut state, &request_id).await;
        let terminal = if result.is_ok() {
            RequestState::Succeeded
        } else {
            RequestState::Failed
        };
        transition(&mut state, terminal, &request_id);
        (state, result)
    }

    async fn drive(
        &self,
        spec: &mut RequestSpec,
        state: &mut RequestState,
        request_id: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        loop {
            let generation = self.prepare(spec).await?;

            let next = state.transmitted();
            transition(state, next, request_id);
            debug!(
                request_id = %request_id,
                method = %spec.method,
                path = %spec.path,
                retried = spec.is_retried(),
                "sending request"
            );

            let response = match self.transmit(spec).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(request_id = %request_id, path = %spec.path, error = %err, "no response");
                    return Err(err);
                }
            };

            let status = response.status();
            if status.is_success() {
                return into_gateway_response(response).await;
            }

            if status == StatusCode::FORBIDDEN && !spec.is_retried() {
                spec.mark_retried();
                transition(state, RequestState::AuthRejected, request_id);
                info!(request_id = %request_id, path = %spec.path, "access token rejected; refreshing");
                self.reauthorize(spec, request_id, generation).await?;
                continue;
            }

            debug!(
                request_id = %request_id,
                status = %status.as_u16(),
                retried = spec.is_retried(),
                "request rejected"
            );
            return Err(rejection(response).await);
        }
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.send(RequestSpec::get(path)).await?.json()
    }

    /// POST `body` to `path` and decode the JSON body.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
    ) -> Result<T, GatewayError> {
        self.send(RequestSpec::post(path, body)).await?.json()
    }

    /// Attach credentials. Returns the refresh generation the request goes out
    /// under.
    async fn prepare(&self, spec: &mut RequestSpec) -> Result<u64, GatewayError> {
        if !spec.headers.contains_key(AUTHORIZATION) {
            if let Some(token) = self.credentials.bearer_token() {
                spec.headers.insert(AUTHORIZATION, bearer_header(&token)?);
            }
        }
        let generation = self.refresh.generation();

        if spec.requires_csrf() {
            let csrf = self
                .csrf
                .get_or_fetch()
                .await
                .map_err(|e| GatewayError::Csrf(Box::new(e)))?;
            spec.headers.insert(CSRF_HEADER, header_value(&csrf.value)?);
        }
        Ok(generation)
    }

    async fn transmit(&self, spec: &RequestSpec) -> Result<reqwest::Response, GatewayError> {
        let url = self.api.url(&spec.path);
        let mut builder = self
            .api
            .http_client()
            .request(spec.method.clone(), &url)
            .headers(spec.headers.clone());
        if !spec.query.is_empty() {
            builder = builder.query(&spec.query);
        }
        if let Some(body) = &spec.body {
            builder = builder.json(body);
        }
        builder.send().await.map_err(GatewayError::NoResponse)
    }

    /// Refresh, then put the new bearer token and a fresh anti-forgery token on
    /// the request.
    async fn reauthorize(
        &self,
        spec: &mut RequestSpec,
        request_id: &str,
        generation: u64,
    ) -> Result<(), GatewayError> {
        let token = self.refresh(request_id, generation).await?;
        spec.headers.insert(AUTHORIZATION, bearer_header(&token)?);

        // the backend may rotate the anti-forgery token with the session
        let csrf = self
            .csrf
            .fetch()
            .await
            .map_err(|e| GatewayError::Csrf(Box::new(e)))?;
        if spec.requires_csrf() {
            spec.headers.insert(CSRF_HEADER, header_value(&csrf.value)?);
        }
        Ok(())
    }

    /// Refresh in a detached task so a caller that gives up on its request
    /// does not abort a refresh other requests depend on.
    async fn refresh(&self, request_id: &str, generation: u64) -> Result<String, GatewayError> {
        let gateway = self.clone();
        let request_id = request_id.to_string();
        tokio::spawn(async move { gateway.refresh_single_flight(&request_id, generation).await })
            .await
            .map_err(|e| GatewayError::Internal(format!("refresh task: {e}")))?
    }

    async fn refresh_single_flight(
        &self,
        request_id: &str,
        sent_under: u64,
    ) -> Result<String, GatewayError> {
        let mut last = self.refresh.last.lock().await;

        if self.refresh.generation() != sent_under {
            if let Some(outcome) = last.as_ref() {
                debug!(
                    request_id = %request_id,
                    refreshed = outcome.is_ok(),
                    "adopting refresh completed by a concurrent request"
                );
                return outcome.clone().map_err(GatewayError::Refresh);
            }
        }

        let outcome = match self.api.refresh().await {
            Ok(token) => {
                // claims are left as they are; only session bootstrap re-derives them
                self.credentials.replace_bearer_token(token.clone());
                self.audit.token_refreshed(Some(request_id), "gateway");
                Ok(token)
            }
            Err(err) => {
                self.audit.refresh_failed(Some(request_id), &err.to_string());
                self.credentials.clear();
                self.audit.session_cleared("refresh failed");
                Err(Arc::new(err))
            }
        };
        *last = Some(outcome.clone());
        self.refresh.generation.fetch_add(1, Ordering::AcqRel);
        outcome.map_err(GatewayError::Refresh)
    }
}

async fn into_gateway_response(
    response: reqwest::Response,
) -> Result<GatewayResponse, GatewayError> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(GatewayError::NoResponse)?;
    Ok(GatewayResponse {
        status,
        headers,
        body,
    })
}

fn bearer_header(token: &str) -> Result<HeaderValue, GatewayError> {
    header_value(&format!("Bearer {token}"))
}

fn header_value(value: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(value)
        .map_err(|e| GatewayError::InvalidRequest(format!("header value: {e}")))
}
