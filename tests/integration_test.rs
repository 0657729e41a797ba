// Integration tests for the cr-dashboard session client
//
// These tests run the full client stack (bearer attach, 401 refresh and
// replay, credential store, cookie mirror, scheduler) against a mock
// cr-engine.

use chrono::Utc;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use cr_dashboard::{
    auth::{
        CookieJar, CredentialRecord, CredentialStore, MemoryStore, SessionEvent, SessionManager,
        SessionMirror, SignUpOutcome, UserSnapshot,
    },
    error::ClientError,
    http_client::{ApiClient, RequestOptions},
    scheduler::{self, RefreshScheduler},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

struct Harness {
    server: ServerGuard,
    store: Arc<MemoryStore>,
    jar: Arc<CookieJar>,
    client: ApiClient,
}

fn record(access: &str, refresh: Option<&str>, expires_in: i64) -> CredentialRecord {
    CredentialRecord {
        access_token: access.to_string(),
        expires_at: Utc::now().timestamp() + expires_in,
        refresh_token: refresh.map(str::to_string),
        user: Some(UserSnapshot {
            id: "user-1".to_string(),
            email: Some("owner@example.com".to_string()),
            user_metadata: Value::Null,
        }),
    }
}

/// Client against a fresh mock server, optionally pre-seeded with a session
async fn harness(seed: Option<CredentialRecord>) -> Harness {
    let server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());
    if let Some(r) = &seed {
        store.save_record(r).unwrap();
    }
    let jar = Arc::new(CookieJar::new());

    let session = Arc::new(
        SessionManager::new(server.url(), store.clone(), jar.clone(), 300)
            .expect("Failed to create session manager"),
    );
    let client = ApiClient::new(session, 10, 5, 10).expect("Failed to create HTTP client");

    Harness {
        server,
        store,
        jar,
        client,
    }
}

fn refresh_body(access: &str, refresh: &str) -> String {
    json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": refresh,
        "user": {"id": "user-1", "email": "owner@example.com"}
    })
    .to_string()
}

// ==================================================================================================
// Bearer Attachment
// ==================================================================================================

#[tokio::test]
async fn test_bearer_attached_when_signed_in() {
    let mut h = harness(Some(record("access-1", Some("refresh-1"), 3600))).await;

    let kb = h
        .server
        .mock("GET", "/kb")
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":"kb-1","name":"Docs"}]"#)
        .expect(1)
        .create_async()
        .await;

    let value = h.client.get("/kb").await.unwrap();
    assert_eq!(value[0]["name"], "Docs");
    kb.assert_async().await;
}

#[tokio::test]
async fn test_skip_auth_sends_no_header() {
    let mut h = harness(Some(record("access-1", Some("refresh-1"), 3600))).await;

    let public = h
        .server
        .mock("GET", "/plans")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(r#"{"plans":[]}"#)
        .expect(1)
        .create_async()
        .await;

    let value = h
        .client
        .request(
            reqwest::Method::GET,
            "/plans",
            None,
            RequestOptions::skip_auth(),
        )
        .await
        .unwrap();
    assert_eq!(value, json!({"plans": []}));
    public.assert_async().await;
}

#[tokio::test]
async fn test_no_header_without_session() {
    let mut h = harness(None).await;

    let mock = h
        .server
        .mock("GET", "/health")
        .match_header("authorization", Matcher::Missing)
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let value = h.client.get("/health").await.unwrap();
    assert_eq!(value, Value::Null);
    mock.assert_async().await;
}

// ==================================================================================================
// Reactive Refresh
// ==================================================================================================

#[tokio::test]
async fn test_401_refreshes_and_replays_once() {
    let mut h = harness(Some(record("old-access", Some("refresh-1"), 3600))).await;
    let mut events = h.client.session().subscribe();

    let rejected = h
        .server
        .mock("GET", "/conversations")
        .match_header("authorization", "Bearer old-access")
        .with_status(401)
        .with_body(r#"{"error":"JWT expired"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .match_body(Matcher::Json(json!({"refresh_token": "refresh-1"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(refresh_body("new-access", "refresh-2"))
        .expect(1)
        .create_async()
        .await;
    let replay = h
        .server
        .mock("GET", "/conversations")
        .match_header("authorization", "Bearer new-access")
        .with_status(200)
        .with_body(r#"{"conversations":[{"id":"c-1"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let before = Utc::now().timestamp();
    let value = h.client.get("/conversations").await.unwrap();
    assert_eq!(value["conversations"][0]["id"], "c-1");

    rejected.assert_async().await;
    refresh.assert_async().await;
    replay.assert_async().await;

    // Store and cookie hold the rotated credentials, nothing stale
    let stored = h.store.load_record().unwrap().unwrap();
    assert_eq!(stored.access_token, "new-access");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-2"));
    assert!(stored.expires_at >= before + 3600);
    assert_eq!(h.jar.token().as_deref(), Some("new-access"));

    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::Refreshed { .. }
    ));
}

#[tokio::test]
async fn test_failed_refresh_purges_and_surfaces_401() {
    let mut h = harness(Some(record("old-access", Some("revoked"), 3600))).await;
    let mut events = h.client.session().subscribe();

    let rejected = h
        .server
        .mock("GET", "/kb")
        .match_header("authorization", "Bearer old-access")
        .with_status(401)
        .with_body(r#"{"error":"JWT expired"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .with_status(401)
        .with_body(r#"{"error":"Invalid Refresh Token"}"#)
        .expect(1)
        .create_async()
        .await;

    let err = h.client.get("/kb").await.unwrap_err();
    match &err {
        ClientError::AuthExpired { status, message } => {
            assert_eq!(*status, 401);
            assert_eq!(message, "JWT expired");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.requires_reauth());

    rejected.assert_async().await;
    refresh.assert_async().await;

    assert!(h.store.is_empty());
    assert!(h.store.load_record().unwrap().is_none());
    assert!(h.jar.token().is_none());
    assert!(!h.client.session().is_authenticated().await);

    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::ReauthRequired { .. }
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_401_without_refresh_token_requires_reauth() {
    let mut h = harness(Some(record("old-access", None, 3600))).await;

    let rejected = h
        .server
        .mock("GET", "/kb")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let err = h.client.get("/kb").await.unwrap_err();
    assert!(matches!(err, ClientError::RefreshUnavailable { status: 401, .. }));
    assert!(h.store.is_empty());

    rejected.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_replay_failure_is_not_retried_again() {
    let mut h = harness(Some(record("old-access", Some("refresh-1"), 3600))).await;

    let first = h
        .server
        .mock("GET", "/billing")
        .match_header("authorization", "Bearer old-access")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(refresh_body("new-access", "refresh-2"))
        .expect(1)
        .create_async()
        .await;
    let replay = h
        .server
        .mock("GET", "/billing")
        .match_header("authorization", "Bearer new-access")
        .with_status(401)
        .with_body(r#"{"message":"Subscription required"}"#)
        .expect(1)
        .create_async()
        .await;

    let err = h.client.get("/billing").await.unwrap_err();
    assert!(matches!(err, ClientError::Upstream { status: 401, .. }));

    first.assert_async().await;
    refresh.assert_async().await;
    replay.assert_async().await;

    // The refresh itself succeeded, so the session stays
    assert_eq!(
        h.client.session().access_token().await.as_deref(),
        Some("new-access")
    );
}

#[tokio::test]
async fn test_auth_endpoints_never_refresh() {
    let mut h = harness(Some(record("old-access", Some("refresh-1"), 3600))).await;

    let signin = h
        .server
        .mock("POST", "/auth/signin")
        .with_status(401)
        .with_body(r#"{"error":"Invalid login credentials"}"#)
        .expect(1)
        .create_async()
        .await;
    let signup = h
        .server
        .mock("POST", "/auth/signup")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let err = h
        .client
        .sign_in("owner@example.com", "wrong")
        .await
        .unwrap_err();
    match err {
        ClientError::Upstream { status, message, .. } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Invalid login credentials");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // Same for an authenticated call to the sign-up endpoint
    let err = h
        .client
        .post("/auth/signup", &json!({"email": "x@y.z"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Upstream { status: 401, .. }));

    signin.assert_async().await;
    signup.assert_async().await;
    refresh.assert_async().await;

    // Credentials untouched
    assert!(h.store.load_record().unwrap().is_some());
}

#[tokio::test]
async fn test_auth_endpoint_without_leading_slash_never_refreshes() {
    let mut h = harness(Some(record("access-1", Some("refresh-1"), 3600))).await;
    let mut events = h.client.session().subscribe();

    let signin = h
        .server
        .mock("POST", "/auth/signin")
        .with_status(401)
        .with_body(r#"{"error":"Invalid login credentials"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let err = h
        .client
        .post("auth/signin", &json!({"email": "owner@example.com", "password": "wrong"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Upstream { status: 401, .. }));

    signin.assert_async().await;
    refresh.assert_async().await;

    // The valid session survives a rejected sign-in
    let stored = h.store.load_record().unwrap().unwrap();
    assert_eq!(stored.access_token, "access-1");
    assert_eq!(
        h.client.session().access_token().await.as_deref(),
        Some("access-1")
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let mut h = harness(Some(record("old-access", Some("refresh-1"), 3600))).await;

    let mut mocks = Vec::new();
    for path in ["/kb", "/conversations"] {
        mocks.push(
            h.server
                .mock("GET", path)
                .match_header("authorization", "Bearer old-access")
                .with_status(401)
                .expect_at_most(1)
                .create_async()
                .await,
        );
        mocks.push(
            h.server
                .mock("GET", path)
                .match_header("authorization", "Bearer new-access")
                .with_status(200)
                .with_body(format!(r#"{{"path":"{}"}}"#, path))
                .expect(1)
                .create_async()
                .await,
        );
    }
    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(refresh_body("new-access", "refresh-2"))
        .expect(1)
        .create_async()
        .await;

    let (a, b) = tokio::join!(h.client.get("/kb"), h.client.get("/conversations"));
    assert_eq!(a.unwrap()["path"], "/kb");
    assert_eq!(b.unwrap()["path"], "/conversations");

    refresh.assert_async().await;
    for mock in mocks {
        mock.assert_async().await;
    }
}

// ==================================================================================================
// Error Surfacing
// ==================================================================================================

#[tokio::test]
async fn test_upstream_error_carries_status_and_message() {
    let mut h = harness(Some(record("access-1", Some("refresh-1"), 3600))).await;

    let missing = h
        .server
        .mock("DELETE", "/kb/kb-9")
        .with_status(404)
        .with_body(r#"{"message":"Knowledge base not found"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let err = h.client.delete("/kb/kb-9").await.unwrap_err();
    match &err {
        ClientError::Upstream {
            status,
            message,
            body,
        } => {
            assert_eq!(*status, 404);
            assert_eq!(message, "Knowledge base not found");
            assert!(body.is_some());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.user_message(), "Knowledge base not found");

    missing.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_network_failure_is_distinct() {
    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(
        SessionManager::new(
            "http://127.0.0.1:1",
            store,
            Arc::new(CookieJar::new()),
            300,
        )
        .unwrap(),
    );
    let client = ApiClient::new(session, 1, 2, 2).unwrap();

    let err = client.get("/kb").await.unwrap_err();
    assert!(matches!(err, ClientError::Network { .. }));
    assert_eq!(err.status(), None);
}

// ==================================================================================================
// Refresh Operation
// ==================================================================================================

#[tokio::test]
async fn test_refresh_without_token_makes_no_call() {
    let mut h = harness(Some(record("access-1", None, 100))).await;

    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let result = h.client.session().refresh_access_token().await.unwrap();
    assert_eq!(result, None);
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_refresh_keeps_refresh_token_when_not_rotated() {
    let mut h = harness(Some(record("access-1", Some("refresh-1"), 100))).await;

    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(r#"{"access_token":"access-2","expires_in":1800}"#)
        .expect(1)
        .create_async()
        .await;

    let token = h.client.session().refresh_access_token().await.unwrap();
    assert_eq!(token.as_deref(), Some("access-2"));

    let stored = h.store.load_record().unwrap().unwrap();
    assert_eq!(stored.access_token, "access-2");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    // User is replaced by what the response carried (nothing)
    assert!(stored.user.is_none());
    refresh.assert_async().await;
}

// ==================================================================================================
// Proactive Refresh
// ==================================================================================================

#[tokio::test]
async fn test_scheduler_refreshes_token_inside_window() {
    let mut h = harness(Some(record("access-1", Some("refresh-1"), 200))).await;
    let mut events = h.client.session().subscribe();

    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(refresh_body("access-2", "refresh-2"))
        .expect(1)
        .create_async()
        .await;

    assert!(h.client.session().should_refresh().await);

    let before = Utc::now().timestamp();
    let scheduler = RefreshScheduler::start(h.client.session().clone(), Duration::from_secs(3600));

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("scheduler did not refresh in time")
        .unwrap();
    assert!(matches!(event, SessionEvent::Refreshed { .. }));
    scheduler.stop().await;

    let stored = h.store.load_record().unwrap().unwrap();
    assert_eq!(stored.access_token, "access-2");
    assert!(stored.expires_at >= before + 3600);
    assert!(!h.client.session().should_refresh().await);
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_proactive_failure_keeps_session() {
    let mut h = harness(Some(record("access-1", Some("refresh-1"), 120))).await;
    let mut events = h.client.session().subscribe();

    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    scheduler::run_tick(h.client.session()).await;

    let stored = h.store.load_record().unwrap().unwrap();
    assert_eq!(stored.access_token, "access-1");
    assert_eq!(h.client.session().access_token().await.as_deref(), Some("access-1"));
    assert!(events.try_recv().is_err());
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_scheduler_ignores_tokens_outside_window() {
    let mut h = harness(Some(record("access-1", Some("refresh-1"), 3600))).await;

    let refresh = h
        .server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    scheduler::run_tick(h.client.session()).await;
    refresh.assert_async().await;
}

// ==================================================================================================
// Sign-in / Sign-up / Sign-out
// ==================================================================================================

#[tokio::test]
async fn test_sign_in_normalizes_token_field() {
    let mut h = harness(None).await;
    let mut events = h.client.session().subscribe();

    let signin = h
        .server
        .mock("POST", "/auth/signin")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({
            "email": "owner@example.com",
            "password": "hunter2"
        })))
        .with_status(200)
        .with_body(
            json!({
                "token": "signin-access",
                "refresh_token": "signin-refresh",
                "expires_in": 3600,
                "user": {"id": "user-1", "email": "owner@example.com"}
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let record = h
        .client
        .sign_in("owner@example.com", "hunter2")
        .await
        .unwrap();
    assert_eq!(record.access_token, "signin-access");
    assert_eq!(record.user.as_ref().unwrap().id, "user-1");

    assert_eq!(h.store.load_record().unwrap(), Some(record));
    assert_eq!(h.jar.token().as_deref(), Some("signin-access"));
    assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedIn);
    signin.assert_async().await;
}

#[tokio::test]
async fn test_sign_up_pending_confirmation() {
    let mut h = harness(None).await;

    let signup = h
        .server
        .mock("POST", "/auth/signup")
        .match_body(Matcher::PartialJson(json!({
            "email": "new@example.com",
            "metadata": {"company": "Acme"}
        })))
        .with_status(200)
        .with_body(r#"{"user":{"id":"user-2","email":"new@example.com"}}"#)
        .expect(1)
        .create_async()
        .await;

    let outcome = h
        .client
        .sign_up("new@example.com", "pw", json!({"company": "Acme"}))
        .await
        .unwrap();
    match outcome {
        SignUpOutcome::ConfirmationPending(Some(user)) => assert_eq!(user.id, "user-2"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!h.client.session().is_authenticated().await);
    signup.assert_async().await;
}

#[tokio::test]
async fn test_sign_out_clears_everything() {
    let h = harness(Some(record("access-1", Some("refresh-1"), 3600))).await;
    h.jar.publish("access-1").unwrap();
    assert!(h.jar.token().is_some());

    h.client.sign_out().await;

    assert!(h.store.is_empty());
    assert!(h.jar.token().is_none());
    assert!(h.client.session().snapshot().await.is_none());
}

#[tokio::test]
async fn test_issue_widget_key() {
    let mut h = harness(Some(record("access-1", Some("refresh-1"), 3600))).await;

    let key = h
        .server
        .mock("POST", "/widget/keys")
        .match_header("authorization", "Bearer access-1")
        .with_status(201)
        .with_body(r#"{"api_key":"wk_live_123"}"#)
        .expect(1)
        .create_async()
        .await;

    assert_eq!(
        h.client.issue_widget_key("/widget/keys").await.unwrap(),
        "wk_live_123"
    );
    key.assert_async().await;
}

// ==================================================================================================
// Persistence Failures
// ==================================================================================================

/// Cookie mirror that rejects every publish
struct RejectingMirror;

impl SessionMirror for RejectingMirror {
    fn publish(&self, _token: &str) -> anyhow::Result<()> {
        anyhow::bail!("cookie write failed")
    }

    fn clear(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn rejecting_mirror_client(
    server: &ServerGuard,
    seed: &CredentialRecord,
) -> (Arc<MemoryStore>, ApiClient) {
    let store = Arc::new(MemoryStore::new());
    store.save_record(seed).unwrap();
    let session = Arc::new(
        SessionManager::new(server.url(), store.clone(), Arc::new(RejectingMirror), 300)
            .expect("Failed to create session manager"),
    );
    let client = ApiClient::new(session, 10, 5, 10).expect("Failed to create HTTP client");
    (store, client)
}

#[tokio::test]
async fn test_unpersisted_refresh_purges_session() {
    let mut server = Server::new_async().await;
    let seed = record("old-access", Some("refresh-1"), 100);
    let (store, client) = rejecting_mirror_client(&server, &seed).await;
    let mut events = client.session().subscribe();

    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(refresh_body("new-access", "refresh-2"))
        .expect(1)
        .create_async()
        .await;

    let err = client.session().refresh_access_token().await.unwrap_err();
    assert!(err.requires_reauth());
    refresh.assert_async().await;

    // No half-written state: store and memory are both empty
    assert!(store.is_empty());
    assert!(client.session().snapshot().await.is_none());
    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::ReauthRequired { .. }
    ));
}

#[tokio::test]
async fn test_unpersisted_reactive_refresh_surfaces_401() {
    let mut server = Server::new_async().await;
    let seed = record("old-access", Some("refresh-1"), 3600);
    let (store, client) = rejecting_mirror_client(&server, &seed).await;

    let rejected = server
        .mock("GET", "/kb")
        .with_status(401)
        .with_body(r#"{"error":"JWT expired"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(refresh_body("new-access", "refresh-2"))
        .expect(1)
        .create_async()
        .await;

    let err = client.get("/kb").await.unwrap_err();
    match err {
        ClientError::AuthExpired { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "JWT expired");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    rejected.assert_async().await;
    refresh.assert_async().await;
    assert!(store.is_empty());
    assert!(client.session().snapshot().await.is_none());
}

#[tokio::test]
async fn test_unpersisted_proactive_refresh_keeps_previous_record() {
    let mut server = Server::new_async().await;
    let seed = record("old-access", Some("refresh-1"), 120);
    let (store, client) = rejecting_mirror_client(&server, &seed).await;

    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(refresh_body("new-access", "refresh-2"))
        .expect(1)
        .create_async()
        .await;

    let err = client.session().refresh_proactively().await.unwrap_err();
    assert!(matches!(err, ClientError::Store(_)));
    refresh.assert_async().await;

    // Store rolled back to exactly what memory still holds
    assert_eq!(store.load_record().unwrap(), Some(seed.clone()));
    assert_eq!(client.session().snapshot().await, Some(seed));
}

// ==================================================================================================
// Shared HTTP Client
// ==================================================================================================

#[tokio::test]
async fn test_refresh_uses_injected_http_client() {
    let mut server = Server::new_async().await;
    let store = Arc::new(MemoryStore::new());
    store
        .save_record(&record("old-access", Some("refresh-1"), 100))
        .unwrap();

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        "x-client-name",
        reqwest::header::HeaderValue::from_static("cr-dashboard-cli"),
    );
    let http = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let session = Arc::new(
        SessionManager::with_client(
            server.url(),
            store.clone(),
            Arc::new(CookieJar::new()),
            300,
            http.clone(),
        )
        .unwrap(),
    );
    let client = ApiClient::with_client(session, http);

    let refresh = server
        .mock("POST", "/auth/refresh")
        .match_header("x-client-name", "cr-dashboard-cli")
        .with_status(200)
        .with_body(refresh_body("new-access", "refresh-2"))
        .expect(1)
        .create_async()
        .await;
    let kb = server
        .mock("GET", "/kb")
        .match_header("x-client-name", "cr-dashboard-cli")
        .match_header("authorization", "Bearer new-access")
        .with_status(200)
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;

    client.session().refresh_access_token().await.unwrap();
    assert_eq!(client.get("/kb").await.unwrap(), json!([]));

    refresh.assert_async().await;
    kb.assert_async().await;
}
