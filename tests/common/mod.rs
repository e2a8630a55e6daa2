//! Shared helpers: an in-process stub of the ITSM table API and identity
//! endpoints, served by axum on an ephemeral port.

#![allow(dead_code)]

use axum::extract::{Form, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use itsm_gateway::types::{AuthConfig, BasicAuthConfig, Secret, ServerConfig};
use itsm_gateway::BackendClient;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const KNOWN_INCIDENT: &str = "INC0010001";
/// Lookups for this number are answered with `KNOWN_INCIDENT`'s record.
pub const MISMATCHED_INCIDENT: &str = "INC0020002";

/// Observable state of the stub backend.
#[derive(Debug, Default)]
pub struct StubState {
    /// Table API requests received, including rejected ones.
    pub table_requests: AtomicUsize,
    pub token_requests: AtomicUsize,
    pub login_requests: AtomicUsize,
    /// Table requests to answer with 401 before behaving normally.
    pub reject_next: AtomicUsize,
    /// Status code the token endpoint answers with (0 means 200).
    pub token_status: AtomicUsize,
    /// Artificial latency on table requests, in milliseconds.
    pub table_delay_ms: AtomicUsize,
    /// `Authorization`/`Cookie` headers seen by the table API.
    pub seen_auth: Mutex<Vec<String>>,
    /// Query strings seen by the table API.
    pub seen_queries: Mutex<Vec<HashMap<String, String>>>,
    /// Bodies posted to the table API.
    pub posted: Mutex<Vec<Value>>,
}

impl StubState {
    pub fn table_requests(&self) -> usize {
        self.table_requests.load(Ordering::SeqCst)
    }

    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn login_requests(&self) -> usize {
        self.login_requests.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> HashMap<String, String> {
        self.seen_queries.lock().unwrap().last().cloned().unwrap_or_default()
    }

    pub fn seen_auth(&self) -> Vec<String> {
        self.seen_auth.lock().unwrap().clone()
    }
}

pub struct StubBackend {
    pub base_url: String,
    pub state: Arc<StubState>,
    _server: tokio::task::JoinHandle<()>,
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self._server.abort();
    }
}

pub async fn spawn_stub() -> StubBackend {
    let state = Arc::new(StubState::default());
    let app = Router::new()
        .route("/api/now/table/{table}", get(list_table).post(create_record))
        .route("/oauth_token.do", post(issue_token))
        .route("/login.do", post(login))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    StubBackend {
        base_url: format!("http://{addr}"),
        state,
        _server: server,
    }
}

impl StubBackend {
    pub fn server_config(&self, auth: AuthConfig) -> ServerConfig {
        ServerConfig {
            instance_url: self.base_url.clone(),
            timeout: Duration::from_secs(5),
            auth,
        }
    }

    pub fn basic_client(&self) -> BackendClient {
        BackendClient::from_config(self.server_config(basic_auth())).unwrap()
    }
}

pub fn basic_auth() -> AuthConfig {
    AuthConfig::Basic(BasicAuthConfig {
        username: "admin".to_string(),
        password: Secret::new("s3cret"),
    })
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": {"message": "User Not Authenticated", "detail": "Required to provide Auth information"},
            "status": "failure",
        })),
    )
        .into_response()
}

fn record_auth(state: &StubState, headers: &HeaderMap) {
    let seen = headers
        .get(header::AUTHORIZATION)
        .or_else(|| headers.get(header::COOKIE))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    state.seen_auth.lock().unwrap().push(seen);
}

fn sample_incident(number: &str) -> Value {
    json!({
        "sys_id": "9d385017c611228701d22104cc95c371",
        "number": number,
        "short_description": "Email server down",
        "description": "Users cannot reach the mail server",
        "state": "In Progress",
        "priority": "1 - Critical",
        "assigned_to": "Beth Anglin",
        "category": "network",
        "sys_created_on": "2024-01-01 10:00:00",
        "sys_updated_on": "2024-01-02 11:00:00",
    })
}

async fn list_table(
    State(state): State<Arc<StubState>>,
    Path(table): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.table_requests.fetch_add(1, Ordering::SeqCst);
    record_auth(&state, &headers);
    state.seen_queries.lock().unwrap().push(query.clone());

    let delay = state.table_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
    }

    let rejected = state
        .reject_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if rejected {
        return unauthorized();
    }

    let result = match table.as_str() {
        "incident" => match query.get("sysparm_query").map(String::as_str) {
            Some(q) if q == format!("number={KNOWN_INCIDENT}") => vec![sample_incident(KNOWN_INCIDENT)],
            Some(q) if q == format!("number={MISMATCHED_INCIDENT}") => {
                vec![sample_incident(KNOWN_INCIDENT)]
            }
            Some(q) if q.starts_with("number=") => Vec::new(),
            _ => vec![sample_incident(KNOWN_INCIDENT), sample_incident("INC0010002")],
        },
        "kb_category" => vec![json!({
            "sys_id": {"display_value": "cat1", "value": "cat1"},
            "label": {"display_value": "Networking", "value": "Networking"},
            "kb_knowledge_base": {"display_value": "IT", "value": "kb1"},
            "active": {"display_value": "true", "value": "true"},
        })],
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": {"message": "Invalid table", "detail": table}})),
            )
                .into_response()
        }
    };
    Json(json!({ "result": result })).into_response()
}

async fn create_record(
    State(state): State<Arc<StubState>>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.table_requests.fetch_add(1, Ordering::SeqCst);
    record_auth(&state, &headers);
    state.posted.lock().unwrap().push(body.clone());

    let mut created = body;
    created["sys_id"] = json!(format!("{table}-new"));
    (StatusCode::CREATED, Json(json!({ "result": created }))).into_response()
}

async fn issue_token(
    State(state): State<Arc<StubState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let n = state.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
    let status = state.token_status.load(Ordering::SeqCst);
    if status != 0 {
        let code = StatusCode::from_u16(status as u16).unwrap_or(StatusCode::BAD_REQUEST);
        return (code, Json(json!({"error": "invalid_client"}))).into_response();
    }
    if form.get("client_id").map(String::as_str) != Some("gateway") {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_client"}))).into_response();
    }
    Json(json!({
        "access_token": format!("tok-{n}"),
        "expires_in": 1800,
        "token_type": "Bearer",
        "grant_type": form.get("grant_type"),
    }))
    .into_response()
}

async fn login(State(state): State<Arc<StubState>>) -> Response {
    let n = state.login_requests.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, "/navpage.do".to_string()),
            (header::SET_COOKIE, format!("JSESSIONID=session-{n}; Path=/; HttpOnly")),
        ],
    )
        .into_response()
}
