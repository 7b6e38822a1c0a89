use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use learnlab_client::api::ModuleSessionsApi;
use learnlab_client::config::AuthEndpoints;
use learnlab_client::session::{LogoutReason, SessionEvent, SessionState};
use learnlab_client::storage::{FileTokenStore, MemoryTokenStore, TokenPair, TokenStore};
use learnlab_client::telemetry::{BatchSettings, InteractionBatcher, InteractionRecord};
use learnlab_client::transport::{ApiRequest, ApiResponse, Transport};
use learnlab_client::{AuthClient, ClientError};
use reqwest::StatusCode;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn mint(sub: &str, exp_offset: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    encode(
        &Header::default(),
        &json!({"sub": sub, "email": format!("{}@example.com", sub), "exp": now + exp_offset, "jti": uuid::Uuid::new_v4().to_string()}),
        &EncodingKey::from_secret(b"backend-secret"),
    )
    .unwrap()
}

#[derive(Default)]
struct BackendState {
    live_access: HashSet<String>,
    live_refresh: HashSet<String>,
    calls: HashMap<String, usize>,
    interactions: Vec<serde_json::Value>,
}

/// In-process stand-in for the LearnLab REST API. Every call yields once so
/// concurrent requests interleave the way network round-trips do.
#[derive(Default)]
struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    fn issue(&self, sub: &str) -> TokenPair {
        let access = mint(sub, 600);
        let refresh = uuid::Uuid::new_v4().to_string();
        let mut state = self.state.lock().unwrap();
        state.live_access.insert(access.clone());
        state.live_refresh.insert(refresh.clone());
        TokenPair::new(access, Some(refresh))
    }

    fn revoke_access(&self) {
        self.state.lock().unwrap().live_access.clear();
    }

    fn revoke_refresh(&self) {
        self.state.lock().unwrap().live_refresh.clear();
    }

    fn calls(&self, path: &str) -> usize {
        self.state.lock().unwrap().calls.get(path).copied().unwrap_or(0)
    }

    fn interactions(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().interactions.clone()
    }

    fn handle(&self, request: ApiRequest) -> ApiResponse {
        let unauthorized = ApiResponse::new(StatusCode::UNAUTHORIZED, json!({"message": "unauthorized"}));
        *self
            .state
            .lock()
            .unwrap()
            .calls
            .entry(request.path.clone())
            .or_default() += 1;

        match request.path.as_str() {
            "/auth/login" => {
                let body = request.body.unwrap_or_default();
                if body["password"] != "correct horse" {
                    return ApiResponse::new(
                        StatusCode::UNAUTHORIZED,
                        json!({"message": "invalid credentials"}),
                    );
                }
                let pair = self.issue("ada");
                ApiResponse::ok(json!({
                    "access_token": pair.access_token,
                    "refresh_token": pair.refresh_token,
                }))
            }
            "/auth/refresh" => {
                let presented = request.body.unwrap_or_default()["refresh_token"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                let mut state = self.state.lock().unwrap();
                if !state.live_refresh.remove(&presented) {
                    return unauthorized;
                }
                drop(state);
                let pair = self.issue("ada");
                ApiResponse::ok(json!({
                    "accessToken": pair.access_token,
                    "refreshToken": pair.refresh_token,
                }))
            }
            path => {
                let mut state = self.state.lock().unwrap();
                let authorized = request
                    .bearer
                    .as_ref()
                    .map(|t| state.live_access.contains(t))
                    .unwrap_or(false);
                if !authorized {
                    return unauthorized;
                }
                if path.ends_with("/interactions") {
                    state.interactions.push(request.body.unwrap_or_default());
                    return ApiResponse::new(StatusCode::CREATED, serde_json::Value::Null);
                }
                ApiResponse::ok(json!({"path": path}))
            }
        }
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        tokio::task::yield_now().await;
        Ok(self.handle(request))
    }
}

fn client(backend: &Arc<FakeBackend>, store: Arc<dyn TokenStore>) -> AuthClient {
    AuthClient::new(backend.clone(), store, AuthEndpoints::default())
}

/// Login, expire the access token server-side, then watch the client
/// recover transparently.
#[tokio::test]
async fn test_login_then_transparent_refresh() {
    let backend = Arc::new(FakeBackend::default());
    let client = client(&backend, Arc::new(MemoryTokenStore::new()));

    let user = client.login("ada@example.com", "correct horse").await.unwrap();
    assert_eq!(user.id, "ada");

    backend.revoke_access();
    let body = client.get_json("/api/libraries").await.unwrap();
    assert_eq!(body["path"], "/api/libraries");
    assert_eq!(backend.calls("/auth/refresh"), 1);
    assert_eq!(backend.calls("/api/libraries"), 2);
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_wrong_password_keeps_session_empty() {
    let backend = Arc::new(FakeBackend::default());
    let client = client(&backend, Arc::new(MemoryTokenStore::new()));

    let err = client.login("ada@example.com", "hunter2").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(client.session().state(), SessionState::Unauthenticated);
}

/// Concurrent 401s share a single refresh.
#[tokio::test]
async fn test_concurrent_unauthorized_requests_refresh_once() {
    let backend = Arc::new(FakeBackend::default());
    let client = client(&backend, Arc::new(MemoryTokenStore::new()));
    client.login("ada@example.com", "correct horse").await.unwrap();
    backend.revoke_access();

    let (a, b, c) = tokio::join!(
        client.get_json("/api/modules/1"),
        client.get_json("/api/modules/2"),
        client.get_json("/api/modules/3"),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(backend.calls("/auth/refresh"), 1);
}

#[tokio::test]
async fn test_revoked_refresh_token_forces_logout() {
    let backend = Arc::new(FakeBackend::default());
    let client = client(&backend, Arc::new(MemoryTokenStore::new()));
    client.login("ada@example.com", "correct horse").await.unwrap();
    let mut events = client.events();

    backend.revoke_access();
    backend.revoke_refresh();

    let err = client.get_json("/api/libraries").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(backend.calls("/auth/refresh"), 1);
    assert_eq!(backend.calls("/api/libraries"), 1);
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::LoggedOut(LogoutReason::RefreshRejected)
    );
    assert!(client.session().tokens().unwrap().is_none());

    // Later calls go out unauthenticated and do not attempt a refresh.
    assert!(client.get_json("/api/libraries").await.is_err());
    assert_eq!(backend.calls("/auth/refresh"), 1);
}

#[tokio::test]
async fn test_session_survives_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let backend = Arc::new(FakeBackend::default());

    let first = client(&backend, Arc::new(FileTokenStore::new(path.clone())));
    first.login("ada@example.com", "correct horse").await.unwrap();
    drop(first);

    let second = client(&backend, Arc::new(FileTokenStore::new(path.clone())));
    match second.restore().await.unwrap() {
        SessionState::Authenticated(user) => assert_eq!(user.id, "ada"),
        other => panic!("expected Authenticated, got {:?}", other),
    }

    second.logout().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_corrupt_session_file_does_not_block_login() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, "{oops").unwrap();
    let backend = Arc::new(FakeBackend::default());

    let client = client(&backend, Arc::new(FileTokenStore::new(path.clone())));
    assert_eq!(client.restore().await.unwrap(), SessionState::Unauthenticated);
    assert_eq!(backend.calls("/auth/refresh"), 0);

    client.login("ada@example.com", "correct horse").await.unwrap();
    let reopened = FileTokenStore::new(path);
    assert!(reopened.load().unwrap().is_some());
}

/// Interactions batched through the authenticated client reach the
/// module-session endpoint one request per record.
#[tokio::test(start_paused = true)]
async fn test_batched_interactions_delivered_through_client() {
    let backend = Arc::new(FakeBackend::default());
    let client = client(&backend, Arc::new(MemoryTokenStore::new()));
    client.login("ada@example.com", "correct horse").await.unwrap();

    let sink = Arc::new(ModuleSessionsApi::new(client.clone()));
    let settings = BatchSettings {
        max_batch_size: 10,
        flush_timeout: Duration::from_secs(5),
    };
    let (batcher, _) = InteractionBatcher::spawn(sink, settings);
    batcher.start_session("session-1").await.unwrap();

    for n in 0..4 {
        batcher
            .track(InteractionRecord::new(
                format!("q{}", n),
                "multiple_choice",
                "answer",
                json!({"choice": n}),
            ))
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.calls("/api/module-sessions/session-1/interactions"), 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.calls("/api/module-sessions/session-1/interactions"), 4);
    let delivered = backend.interactions();
    assert_eq!(delivered[0]["widget_id"], "q0");
    assert_eq!(delivered[3]["data"]["choice"], 3);
}
