//! In-process stand-in for the errand backend.
//!
//! Accepts exactly one access token at a time, issues scripted credential
//! pairs from the refresh endpoint and records what it saw.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use errand_core::{ApiClient, ApiEndpoints, CredentialPair, CredentialStore, SessionContext};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Barrier;

pub const EMAIL: &str = "u@x.com";
pub const PASSWORD: &str = "pw";

#[derive(Default)]
pub struct FakeState {
    /// The one access token protected endpoints accept
    pub access: Mutex<String>,
    /// The one refresh token the refresh endpoint accepts
    pub refresh: Mutex<String>,
    /// Pairs handed out by successive refreshes
    pub next_pairs: Mutex<VecDeque<(String, String)>>,
    /// Raw response returned by the refresh endpoint instead of a pair
    pub refresh_override: Mutex<Option<(StatusCode, String)>>,
    pub refresh_delay: Mutex<Duration>,
    pub refresh_calls: AtomicUsize,
    pub token_calls: AtomicUsize,
    /// Reject every protected request, whatever token it carries
    pub reject_all: AtomicBool,
    /// Rejected protected requests wait here before answering 401
    pub reject_barrier: Mutex<Option<Arc<Barrier>>>,
    /// Authorization header of every protected request, in arrival order
    pub seen: Mutex<Vec<String>>,
    pub tasks: Mutex<Vec<Value>>,
    /// Bodies posted to the account endpoints, in arrival order
    pub account_posts: Mutex<Vec<Value>>,
    pub next_id: AtomicI64,
}

#[derive(Clone, Default)]
pub struct FakeApi(pub Arc<FakeState>);

impl FakeApi {
    pub fn new(access: &str, refresh: &str) -> Self {
        let api = Self::default();
        *api.0.access.lock() = access.to_string();
        *api.0.refresh.lock() = refresh.to_string();
        api.0.next_id.store(1, Ordering::SeqCst);
        api
    }

    pub fn issue_on_refresh(&self, access: &str, refresh: &str) {
        self.0
            .next_pairs
            .lock()
            .push_back((access.to_string(), refresh.to_string()));
    }

    pub fn refresh_calls(&self) -> usize {
        self.0.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.0.seen.lock().clone()
    }

    /// Serve on an ephemeral port; returns the API base URL.
    pub async fn spawn(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/api/users/token/", post(obtain_pair))
            .route("/api/users/token/refresh/", post(refresh_pair))
            .route("/api/users/me/", get(me))
            .route("/api/users/profile/", get(profile))
            .route("/api/users/register/", post(register))
            .route("/api/users/activate/", post(activate))
            .route("/api/users/resend-activation/", post(resend_activation))
            .route("/api/users/password-reset-request/", post(password_reset_request))
            .route("/api/users/password-reset-confirm/", post(password_reset_confirm))
            .route("/api/tasks/", get(list_tasks).post(create_task))
            .route(
                "/api/tasks/{id}/",
                get(get_task).patch(update_task).delete(delete_task),
            )
            .route("/api/appointments/", get(list_empty))
            .route("/api/contacts/", get(list_contacts))
            .route("/api/echo/", post(echo))
            .with_state(self.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    async fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.0.seen.lock().push(presented.clone());

        let expected = format!("Bearer {}", self.0.access.lock());
        if !self.0.reject_all.load(Ordering::SeqCst) && presented == expected {
            return Ok(());
        }

        let barrier = self.0.reject_barrier.lock().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Given token not valid for any token type", "code": "token_not_valid"})),
        )
            .into_response())
    }
}

/// Client against `base` with its own in-memory store holding `pair`.
pub fn client(base: &str, pair: Option<(&str, &str)>) -> ApiClient {
    let store = Arc::new(CredentialStore::in_memory());
    if let Some((access, refresh)) = pair {
        store.save(CredentialPair::new(access, refresh));
    }
    client_with_store(base, store)
}

pub fn client_with_store(base: &str, store: Arc<CredentialStore>) -> ApiClient {
    ApiClient::with_timeouts(
        ApiEndpoints::from_base(base),
        store,
        Duration::from_secs(5),
        Duration::from_secs(5),
    )
    .expect("client")
}

pub fn session(base: &str, pair: Option<(&str, &str)>) -> SessionContext {
    SessionContext::new(client(base, pair))
}

async fn obtain_pair(State(api): State<FakeApi>, Json(body): Json<Value>) -> Response {
    api.0.token_calls.fetch_add(1, Ordering::SeqCst);
    if body["username"] != EMAIL || body["password"] != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "No active account found with the given credentials"})),
        )
            .into_response();
    }
    *api.0.access.lock() = "A1".to_string();
    *api.0.refresh.lock() = "R1".to_string();
    Json(json!({"access": "A1", "refresh": "R1"})).into_response()
}

async fn refresh_pair(State(api): State<FakeApi>, Json(body): Json<Value>) -> Response {
    api.0.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *api.0.refresh_delay.lock();
    tokio::time::sleep(delay).await;

    if let Some((status, body)) = api.0.refresh_override.lock().clone() {
        return (status, [(header::CONTENT_TYPE, "application/json")], body).into_response();
    }

    let expected = api.0.refresh.lock().clone();
    if body["refresh"] != expected.as_str() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Token is invalid or expired", "code": "token_not_valid"})),
        )
            .into_response();
    }

    let next = api.0.next_pairs.lock().pop_front();
    let (access, refresh) = next.unwrap_or_else(|| ("A-next".to_string(), "R-next".to_string()));
    *api.0.access.lock() = access.clone();
    *api.0.refresh.lock() = refresh.clone();
    Json(json!({"access": access, "refresh": refresh})).into_response()
}

async fn me(State(api): State<FakeApi>, headers: HeaderMap) -> Response {
    if let Err(rejected) = api.authorize(&headers).await {
        return rejected;
    }
    Json(json!({
        "is_authenticated": true,
        "user": {"id": 7, "username": EMAIL, "email": EMAIL, "full_name": "Una Example"}
    }))
    .into_response()
}

async fn profile(State(api): State<FakeApi>, headers: HeaderMap) -> Response {
    if let Err(rejected) = api.authorize(&headers).await {
        return rejected;
    }
    Json(json!({"full_name": "Una Example", "email": EMAIL})).into_response()
}

pub const ACTIVATION_TOKEN: &str = "c0ffee-token";

async fn register(State(api): State<FakeApi>, Json(body): Json<Value>) -> Response {
    api.0.account_posts.lock().push(body.clone());
    if body["email"] == EMAIL {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"email": ["A user with that email already exists."]})),
        )
            .into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({"message": "User registered successfully", "user_id": 42})),
    )
        .into_response()
}

async fn activate(State(api): State<FakeApi>, Json(body): Json<Value>) -> Response {
    api.0.account_posts.lock().push(body.clone());
    if body["token"] != ACTIVATION_TOKEN {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid or expired activation link"})),
        )
            .into_response();
    }
    Json(json!({"message": "Account activated successfully"})).into_response()
}

async fn resend_activation(State(api): State<FakeApi>, Json(body): Json<Value>) -> Response {
    api.0.account_posts.lock().push(body);
    Json(json!({"message": "Activation email sent"})).into_response()
}

async fn password_reset_request(State(api): State<FakeApi>, Json(body): Json<Value>) -> Response {
    api.0.account_posts.lock().push(body);
    // Some deployments answer with an empty 200
    StatusCode::OK.into_response()
}

async fn password_reset_confirm(State(api): State<FakeApi>, Json(body): Json<Value>) -> Response {
    api.0.account_posts.lock().push(body.clone());
    if body["token"] != ACTIVATION_TOKEN {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid or expired reset link"})),
        )
            .into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn list_tasks(State(api): State<FakeApi>, headers: HeaderMap) -> Response {
    if let Err(rejected) = api.authorize(&headers).await {
        return rejected;
    }
    Json(Value::Array(api.0.tasks.lock().clone())).into_response()
}

async fn create_task(
    State(api): State<FakeApi>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    if let Err(rejected) = api.authorize(&headers).await {
        return rejected;
    }
    if body["description"].as_str().unwrap_or_default().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"description": ["This field may not be blank."]})),
        )
            .into_response();
    }
    let id = api.0.next_id.fetch_add(1, Ordering::SeqCst);
    body["id"] = json!(id);
    body["completed"] = json!(false);
    body["created_at"] = json!("2025-03-01T10:15:00Z");
    api.0.tasks.lock().push(body.clone());
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn get_task(State(api): State<FakeApi>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(rejected) = api.authorize(&headers).await {
        return rejected;
    }
    let tasks = api.0.tasks.lock();
    match tasks.iter().find(|t| t["id"] == id) {
        Some(task) => Json(task.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "No Task matches the given query."})))
            .into_response(),
    }
}

async fn update_task(
    State(api): State<FakeApi>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(patch): Json<Value>,
) -> Response {
    if let Err(rejected) = api.authorize(&headers).await {
        return rejected;
    }
    let mut tasks = api.0.tasks.lock();
    let Some(task) = tasks.iter_mut().find(|t| t["id"] == id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let (Some(task), Some(patch)) = (task.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            task.insert(key.clone(), value.clone());
        }
    }
    Json(task.clone()).into_response()
}

async fn delete_task(State(api): State<FakeApi>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(rejected) = api.authorize(&headers).await {
        return rejected;
    }
    let mut tasks = api.0.tasks.lock();
    let before = tasks.len();
    tasks.retain(|t| t["id"] != id);
    if tasks.len() == before {
        StatusCode::NOT_FOUND.into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn list_empty(State(api): State<FakeApi>, headers: HeaderMap) -> Response {
    if let Err(rejected) = api.authorize(&headers).await {
        return rejected;
    }
    Json(json!([])).into_response()
}

async fn list_contacts(State(api): State<FakeApi>, headers: HeaderMap) -> Response {
    if let Err(rejected) = api.authorize(&headers).await {
        return rejected;
    }
    Json(json!([
        {"id": 1, "name": "Ada Lovelace", "email": "ada@example.com"},
        {"id": 2, "name": "Charles Babbage"}
    ]))
    .into_response()
}

async fn echo(State(api): State<FakeApi>, headers: HeaderMap, body: String) -> Response {
    if let Err(rejected) = api.authorize(&headers).await {
        return rejected;
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({"content_type": content_type, "body": body})).into_response()
}
