//! Test fixtures: a mock admin API served by axum on 127.0.0.1:0

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use admin_auth::{AuthApi, CredentialPair, CredentialStore, Principal, Role};
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::pipeline::Pipeline;
use crate::refresh::RefreshCoordinator;
use crate::state::SessionState;

pub(crate) const PASSWORD: &str = "pw";

pub(crate) fn principal(role: Role) -> Principal {
    serde_json::from_value(json!({
        "id": "u-1",
        "email": "admin@example.com",
        "firstName": "Ana",
        "lastName": "Admin",
        "role": role,
    }))
    .unwrap()
}

/// In-memory store holding a pair and an admin principal.
pub(crate) fn seeded_store(access: &str, refresh: &str) -> CredentialStore {
    let store = CredentialStore::in_memory();
    store.set(&CredentialPair::new(access, refresh));
    store.set_principal(&principal(Role::Admin));
    store
}

/// State, coordinator and pipeline wired against `mock`, hydrated from `store`.
pub(crate) fn wire(mock: &MockApi, store: CredentialStore) -> (SessionState, RefreshCoordinator, Pipeline) {
    let session = SessionState::new(store);
    session.load_from_store();
    let api = AuthApi::new(reqwest::Client::new(), mock.base_url());
    let coordinator = RefreshCoordinator::new(api.clone(), session.clone());
    let pipeline = Pipeline::new(api, session.clone(), coordinator.clone());
    (session, coordinator, pipeline)
}

struct Tokens {
    access: String,
    refresh: String,
    generation: u64,
}

struct MockState {
    tokens: Mutex<Tokens>,
    role: Mutex<Role>,
    refresh_delay_ms: AtomicU64,
    me_forbidden: AtomicBool,
    logout_fails: AtomicBool,
    refresh_calls: AtomicUsize,
    me_calls: AtomicUsize,
    resource_calls: AtomicUsize,
    always_401_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

/// Mock API. Accepts exactly one access token and one refresh token at a
/// time. A successful refresh rotates both to `A{n}`/`R{n}` with `n` one past
/// the previous generation (starting at 1).
pub(crate) struct MockApi {
    base_url: String,
    state: Arc<MockState>,
}

impl MockApi {
    pub(crate) async fn start(access: &str, refresh_token: &str) -> Self {
        let state = Arc::new(MockState {
            tokens: Mutex::new(Tokens {
                access: access.to_string(),
                refresh: refresh_token.to_string(),
                generation: 1,
            }),
            role: Mutex::new(Role::Admin),
            refresh_delay_ms: AtomicU64::new(0),
            me_forbidden: AtomicBool::new(false),
            logout_fails: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
            resource_calls: AtomicUsize::new(0),
            always_401_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        });

        let app = axum::Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/refresh", post(refresh))
            .route("/api/auth/me", get(me))
            .route("/api/auth/logout", post(logout))
            .route("/api/resource", get(resource).post(resource))
            .route("/api/forbidden", get(forbidden))
            .route("/api/always-401", get(always_401))
            .route("/api/boom", get(boom))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/api"),
            state,
        }
    }

    pub(crate) fn base_url(&self) -> String {
        self.base_url.clone()
    }

    pub(crate) fn set_refresh_delay(&self, delay: Duration) {
        self.state
            .refresh_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn set_role(&self, role: Role) {
        *self.state.role.lock().unwrap() = role;
    }

    pub(crate) fn set_me_forbidden(&self, forbidden: bool) {
        self.state.me_forbidden.store(forbidden, Ordering::SeqCst);
    }

    pub(crate) fn set_logout_fails(&self, fails: bool) {
        self.state.logout_fails.store(fails, Ordering::SeqCst);
    }

    /// Stop accepting the current access token; the refresh token stays valid.
    pub(crate) fn expire_access(&self) {
        self.state.tokens.lock().unwrap().access = "<expired>".to_string();
    }

    /// Stop accepting the current refresh token.
    pub(crate) fn revoke_refresh(&self) {
        self.state.tokens.lock().unwrap().refresh = "<revoked>".to_string();
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn me_calls(&self) -> usize {
        self.state.me_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn resource_calls(&self) -> usize {
        self.state.resource_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn always_401_calls(&self) -> usize {
        self.state.always_401_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }
}

impl MockState {
    fn accepts(&self, headers: &HeaderMap) -> bool {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        bearer.is_some_and(|token| token == self.tokens.lock().unwrap().access)
    }

    fn user(&self) -> Value {
        let role = *self.role.lock().unwrap();
        serde_json::to_value(principal(role)).unwrap()
    }
}

fn ok(data: Value) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn failure(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "error": { "code": status.as_u16().to_string(), "message": message },
        })),
    )
        .into_response()
}

async fn login(State(s): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    if body["password"] != PASSWORD {
        return failure(StatusCode::UNAUTHORIZED, "Invalid email or password");
    }
    let (access, refresh) = {
        let tokens = s.tokens.lock().unwrap();
        (tokens.access.clone(), tokens.refresh.clone())
    };
    ok(json!({ "accessToken": access, "refreshToken": refresh, "user": s.user() }))
}

async fn refresh(State(s): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    s.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = s.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let presented = body["refreshToken"].as_str().unwrap_or_default().to_string();
    let rotated = {
        let mut tokens = s.tokens.lock().unwrap();
        if presented != tokens.refresh {
            None
        } else {
            tokens.generation += 1;
            tokens.access = format!("A{}", tokens.generation);
            tokens.refresh = format!("R{}", tokens.generation);
            Some((tokens.access.clone(), tokens.refresh.clone()))
        }
    };

    match rotated {
        Some((access, refresh)) => ok(json!({ "accessToken": access, "refreshToken": refresh })),
        None => failure(StatusCode::UNAUTHORIZED, "refresh token invalid"),
    }
}

async fn me(State(s): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    s.me_calls.fetch_add(1, Ordering::SeqCst);
    if !s.accepts(&headers) {
        return failure(StatusCode::UNAUTHORIZED, "token expired");
    }
    if s.me_forbidden.load(Ordering::SeqCst) {
        return failure(StatusCode::FORBIDDEN, "account disabled");
    }
    ok(s.user())
}

async fn logout(State(s): State<Arc<MockState>>) -> Response {
    s.logout_calls.fetch_add(1, Ordering::SeqCst);
    if s.logout_fails.load(Ordering::SeqCst) {
        return failure(StatusCode::INTERNAL_SERVER_ERROR, "logout failed");
    }
    Json(json!({ "success": true, "message": "logged out" })).into_response()
}

async fn resource(
    State(s): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> Response {
    let hits = s.resource_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if !s.accepts(&headers) {
        return failure(StatusCode::UNAUTHORIZED, "token expired");
    }
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    ok(json!({ "hits": hits, "requestId": request_id, "page": query.get("page") }))
}

async fn forbidden() -> Response {
    failure(StatusCode::FORBIDDEN, "insufficient role")
}

async fn always_401(State(s): State<Arc<MockState>>) -> Response {
    s.always_401_calls.fetch_add(1, Ordering::SeqCst);
    failure(StatusCode::UNAUTHORIZED, "token expired")
}

async fn boom() -> Response {
    failure(StatusCode::INTERNAL_SERVER_ERROR, "database unavailable")
}
