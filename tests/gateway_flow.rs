use base64::{engine::general_purpose, Engine};
use fieldcheck_client::config::Config;
use fieldcheck_client::security::route_guard::Decision;
use fieldcheck_client::session::bootstrap::{BootstrapOutcome, BootstrapPhase};
use fieldcheck_client::session::credential_store::{Claims, Credential, CredentialStore};
use fieldcheck_client::transport::auth_api::{AuthApi, CSRF_TOKEN_PATH, LOGIN_PATH, REFRESH_PATH};
use fieldcheck_client::transport::RequestSpec;
use fieldcheck_client::{App, GatewayError};
use mockito::{Matcher, Server, ServerGuard};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tempfile::TempDir;

fn jwt(payload: Value) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
    let body = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.sig")
}

fn signed_in(token: &str, roles: &[u16]) -> Credential {
    Credential::new(
        token.to_string(),
        Claims {
            subject_id: "u-1".to_string(),
            role_codes: roles.iter().copied().collect::<BTreeSet<_>>(),
            username: Some("inspector".to_string()),
            email: None,
        },
    )
}

fn app_for(server: &ServerGuard, credential: Option<Credential>) -> App {
    let store = CredentialStore::in_memory();
    if let Some(credential) = credential {
        store.replace(credential);
    }
    App::new(AuthApi::new(server.url(), Client::new()), store)
}

#[tokio::test]
async fn non_forbidden_response_is_sent_once() {
    let mut server = Server::new_async().await;
    let refresh = server
        .mock("GET", REFRESH_PATH)
        .expect(0)
        .create_async()
        .await;
    let data = server
        .mock("GET", "/api/data")
        .with_status(404)
        .with_body(r#"{"message":"no such item"}"#)
        .expect(1)
        .create_async()
        .await;

    let app = app_for(&server, Some(signed_in("T1", &[100])));
    let err = app.gateway.send(RequestSpec::get("/api/data")).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.user_message(), "no such item");
    data.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("GET", "/api/data")
        .match_header("authorization", "Bearer T1")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("GET", REFRESH_PATH)
        .with_status(200)
        .with_body(r#"{"accessToken":"T2"}"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", CSRF_TOKEN_PATH)
        .with_status(200)
        .with_body(r#"{"csrfToken":"c1"}"#)
        .create_async()
        .await;
    let retried = server
        .mock("GET", "/api/data")
        .match_header("authorization", "Bearer T2")
        .with_status(200)
        .with_body(r#"{"items":["pole-17"]}"#)
        .expect(1)
        .create_async()
        .await;

    let app = app_for(&server, Some(signed_in("T1", &[100])));
    let payload: Value = app.gateway.get_json("/api/data").await.unwrap();
    assert_eq!(payload, json!({"items": ["pole-17"]}));

    // token replaced, claims untouched
    let credential = app.credentials().read();
    assert_eq!(credential.bearer_token.as_deref(), Some("T2"));
    assert_eq!(credential.claims, signed_in("T1", &[100]).claims);

    first.assert_async().await;
    refresh.assert_async().await;
    retried.assert_async().await;
}

#[tokio::test]
async fn failed_refresh_clears_session_and_returns_refresh_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/data")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", REFRESH_PATH)
        .with_status(401)
        .with_body(r#"{"message":"refresh token expired"}"#)
        .create_async()
        .await;

    let app = app_for(&server, Some(signed_in("T1", &[100])));
    let err = app.gateway.send(RequestSpec::get("/api/data")).await.unwrap_err();

    match &err {
        GatewayError::Refresh(inner) => assert_eq!(inner.status(), Some(401)),
        other => panic!("expected refresh error, got {other:?}"),
    }
    assert_ne!(err.status(), Some(403));
    assert!(app.credentials().read().is_cleared());

    let (_, decision) = app.navigate("/dashboard").await;
    assert_eq!(decision.redirect_target(), Some("/login"));
}

#[tokio::test]
async fn request_is_retried_at_most_once() {
    let mut server = Server::new_async().await;
    let data = server
        .mock("GET", "/api/data")
        .with_status(403)
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("GET", REFRESH_PATH)
        .with_status(200)
        .with_body(r#"{"accessToken":"T2"}"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", CSRF_TOKEN_PATH)
        .with_status(200)
        .with_body(r#"{"csrfToken":"c1"}"#)
        .create_async()
        .await;

    let app = app_for(&server, Some(signed_in("T1", &[100])));
    let err = app.gateway.send(RequestSpec::get("/api/data")).await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(app.credentials().bearer_token().as_deref(), Some("T2"));
    data.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn mutating_calls_carry_csrf_and_retry_with_fresh_one() {
    let mut server = Server::new_async().await;
    let csrf_first = server
        .mock("GET", CSRF_TOKEN_PATH)
        .with_status(200)
        .with_body(r#"{"csrfToken":"c1"}"#)
        .expect(1)
        .create_async()
        .await;
    let csrf_second = server
        .mock("GET", CSRF_TOKEN_PATH)
        .with_status(200)
        .with_body(r#"{"csrfToken":"c2"}"#)
        .expect(1)
        .create_async()
        .await;
    let rejected = server
        .mock("POST", "/api/companies")
        .match_header("authorization", "Bearer T1")
        .match_header("x-csrf-token", "c1")
        .match_body(Matcher::Json(json!({"companyName": "Alpha Electric"})))
        .with_status(403)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", REFRESH_PATH)
        .with_status(200)
        .with_body(r#"{"accessToken":"T2"}"#)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/api/companies")
        .match_header("authorization", "Bearer T2")
        .match_header("x-csrf-token", "c2")
        .match_body(Matcher::Json(json!({"companyName": "Alpha Electric"})))
        .with_status(201)
        .with_body(r#"{"_id":"c-1"}"#)
        .expect(1)
        .create_async()
        .await;

    let app = app_for(&server, Some(signed_in("T1", &[999])));
    let created: Value = app
        .gateway
        .post_json("/api/companies", json!({"companyName": "Alpha Electric"}))
        .await
        .unwrap();
    assert_eq!(created["_id"], "c-1");
    assert_eq!(app.gateway.csrf().get().unwrap().value, "c2");

    csrf_first.assert_async().await;
    csrf_second.assert_async().await;
    rejected.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn csrf_failure_blocks_mutating_call() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", CSRF_TOKEN_PATH)
        .with_status(500)
        .create_async()
        .await;
    let delete = server
        .mock("DELETE", "/api/companies/c-1")
        .expect(0)
        .create_async()
        .await;

    let app = app_for(&server, Some(signed_in("T1", &[999])));
    let err = app
        .gateway
        .send(RequestSpec::delete("/api/companies/c-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Csrf(_)));
    assert_eq!(app.credentials().bearer_token().as_deref(), Some("T1"));
    delete.assert_async().await;
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/data")
        .match_header("authorization", "Bearer T1")
        .with_status(403)
        .expect_at_least(1)
        .create_async()
        .await;
    server
        .mock("GET", "/api/data")
        .match_header("authorization", "Bearer T2")
        .with_status(200)
        .with_body("[]")
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("GET", REFRESH_PATH)
        .with_status(200)
        .with_body(r#"{"accessToken":"T2"}"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", CSRF_TOKEN_PATH)
        .with_status(200)
        .with_body(r#"{"csrfToken":"c1"}"#)
        .create_async()
        .await;

    let app = app_for(&server, Some(signed_in("T1", &[100])));
    let (a, b) = tokio::join!(
        app.gateway.send(RequestSpec::get("/api/data")),
        app.gateway.send(RequestSpec::get("/api/data")),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());
    refresh.assert_async().await;
}

#[tokio::test]
async fn concurrent_rejections_share_one_failed_refresh() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/data")
        .with_status(403)
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("GET", REFRESH_PATH)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let app = app_for(&server, Some(signed_in("T1", &[100])));
    let (a, b) = tokio::join!(
        app.gateway.send(RequestSpec::get("/api/data")),
        app.gateway.send(RequestSpec::get("/api/data")),
    );
    for result in [a, b] {
        let err = result.unwrap_err();
        assert!(err.is_session_expired());
        match err {
            GatewayError::Refresh(inner) => assert_eq!(inner.status(), Some(401)),
            other => panic!("expected refresh error, got {other:?}"),
        }
    }
    refresh.assert_async().await;
    assert!(app.credentials().read().is_cleared());
}

#[tokio::test]
async fn abandoned_request_does_not_cancel_refresh() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/data")
        .with_status(403)
        .create_async()
        .await;
    let refresh = server
        .mock("GET", REFRESH_PATH)
        .with_status(200)
        .with_body_from_request(|_| {
            std::thread::sleep(Duration::from_millis(300));
            br#"{"accessToken":"T2"}"#.to_vec()
        })
        .expect(1)
        .create_async()
        .await;

    let app = app_for(&server, Some(signed_in("T1", &[100])));
    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        app.gateway.send(RequestSpec::get("/api/data")),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(app.credentials().bearer_token().as_deref(), Some("T1"));

    let mut changes = app.credentials().subscribe();
    tokio::time::timeout(Duration::from_secs(5), changes.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(app.credentials().bearer_token().as_deref(), Some("T2"));
    refresh.assert_async().await;
}

#[tokio::test]
async fn session_cookie_from_login_lets_a_later_run_refresh() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", CSRF_TOKEN_PATH)
        .with_status(200)
        .with_body(r#"{"csrfToken":"c1"}"#)
        .create_async()
        .await;
    server
        .mock("POST", LOGIN_PATH)
        .with_status(200)
        .with_header("set-cookie", "jwt=session-1; Path=/; HttpOnly; Max-Age=86400")
        .with_body(
            json!({
                "accessToken": "T1",
                "user": {"id": 7, "username": "inspector", "roles": [100]}
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", "/api/data")
        .match_header("authorization", "Bearer T1")
        .with_status(403)
        .create_async()
        .await;
    let refresh = server
        .mock("GET", REFRESH_PATH)
        .match_header("cookie", "jwt=session-1")
        .with_status(200)
        .with_body(r#"{"accessToken":"T2"}"#)
        .expect(1)
        .create_async()
        .await;
    let retried = server
        .mock("GET", "/api/data")
        .match_header("authorization", "Bearer T2")
        .with_status(200)
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let config = Config {
        api_url: server.url(),
        credential_path: Some(dir.path().join("credential.json")),
        cookie_path: None,
        request_timeout_secs: 10,
    };

    let first = App::from_config(&config).unwrap();
    first.session.login("sam@example.com", "secret").await.unwrap();
    first.save_cookies().unwrap();
    drop(first);

    let second = App::from_config(&config).unwrap();
    assert_eq!(second.credentials().bearer_token().as_deref(), Some("T1"));
    second.gateway.send(RequestSpec::get("/api/data")).await.unwrap();
    assert_eq!(second.credentials().bearer_token().as_deref(), Some("T2"));
    refresh.assert_async().await;
    retried.assert_async().await;
}

#[tokio::test]
async fn signed_out_load_redirects_protected_route_to_login() {
    let mut server = Server::new_async().await;
    let refresh = server
        .mock("GET", REFRESH_PATH)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let app = app_for(&server, None);
    assert_eq!(app.bootstrap.phase(), BootstrapPhase::NotStarted);

    let (outcome, decision) = app.navigate("/dashboard").await;
    assert_eq!(outcome, BootstrapOutcome::SignedOut);
    assert_eq!(
        decision,
        Decision::RedirectToLogin {
            from: "/dashboard".to_string()
        }
    );
    assert!(app.credentials().read().is_cleared());
    refresh.assert_async().await;
}

#[tokio::test]
async fn restored_session_authorizes_by_token_roles() {
    let mut server = Server::new_async().await;
    let token = jwt(json!({"id": "u-5", "roles": [200]}));
    server
        .mock("GET", REFRESH_PATH)
        .with_status(200)
        .with_body(json!({ "accessToken": token }).to_string())
        .create_async()
        .await;

    let app = app_for(&server, None);
    let (outcome, decision) = app.navigate("/editor").await;
    assert_eq!(outcome, BootstrapOutcome::Restored);
    assert_eq!(decision, Decision::Allow);

    let (_, decision) = app.navigate("/admin").await;
    assert_eq!(decision.redirect_target(), Some("/unauthorized"));
}

#[tokio::test]
async fn persisted_credential_skips_refresh() {
    let mut server = Server::new_async().await;
    let refresh = server
        .mock("GET", REFRESH_PATH)
        .expect(0)
        .create_async()
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("credential.json");
    CredentialStore::open(&path).replace(signed_in("T1", &[999]));

    let app = App::new(
        AuthApi::new(server.url(), Client::new()),
        CredentialStore::open(&path),
    );
    let (outcome, decision) = app.navigate("/admin").await;
    assert_eq!(outcome, BootstrapOutcome::AlreadyAuthenticated);
    assert_eq!(decision, Decision::Allow);
    assert_eq!(
        app.bootstrap.phase(),
        BootstrapPhase::Ready(BootstrapOutcome::AlreadyAuthenticated)
    );
    refresh.assert_async().await;
}
