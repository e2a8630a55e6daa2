//! Authentication manager and strategies against live (stub) identity endpoints.

mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::{spawn_stub, KNOWN_INCIDENT};
use itsm_gateway::auth::{AuthManager, Credential, CredentialStrategy};
use itsm_gateway::itsm;
use itsm_gateway::types::{
    ApiKeyConfig, AuthConfig, AuthKind, OAuthConfig, Result, Secret, SessionAuthConfig,
};
use itsm_gateway::{BackendClient, Error};
use pretty_assertions::assert_eq;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Strategy whose first credential is already expired and whose refreshes
/// are slow enough for concurrent callers to pile up behind them.
#[derive(Debug, Default)]
struct SlowCountingStrategy {
    refreshes: AtomicUsize,
}

#[async_trait]
impl CredentialStrategy for SlowCountingStrategy {
    fn kind(&self) -> AuthKind {
        AuthKind::Oauth
    }

    fn produce_headers(&self, credential: &Credential) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {}", credential.value.expose()))
            .map_err(|e| Error::internal(e.to_string()))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    async fn refresh(&self) -> Result<Credential> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 1 {
            return Ok(Credential::expiring("expired", Utc::now() - ChronoDuration::seconds(1)));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Credential::expiring(format!("tok-{n}"), Utc::now() + ChronoDuration::hours(1)))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_refresh() {
    let strategy = Arc::new(SlowCountingStrategy::default());
    let manager = Arc::new(AuthManager::new(strategy.clone(), "https://x.example"));

    // Seed the cache with a credential that expired a second ago.
    let seeded = manager.get_request_auth().await.unwrap();
    assert_eq!(seeded.headers[AUTHORIZATION], "Bearer expired");

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_request_auth().await })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        let auth = task.unwrap().unwrap();
        assert_eq!(auth.headers[AUTHORIZATION], "Bearer tok-2");
    }
    assert_eq!(strategy.refreshes.load(Ordering::SeqCst), 2);
    assert_eq!(manager.refresh_count(), 2);
}

/// Slow strategy that always yields the same outcome: a credential living
/// `lifetime_secs`, or a refusal from the identity endpoint.
#[derive(Debug)]
struct ScriptedStrategy {
    refreshes: AtomicUsize,
    lifetime_secs: Option<i64>,
}

#[async_trait]
impl CredentialStrategy for ScriptedStrategy {
    fn kind(&self) -> AuthKind {
        AuthKind::Oauth
    }

    fn produce_headers(&self, credential: &Credential) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {}", credential.value.expose()))
            .map_err(|e| Error::internal(e.to_string()))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    async fn refresh(&self) -> Result<Credential> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(100)).await;
        match self.lifetime_secs {
            Some(secs) => Ok(Credential::expiring(
                format!("tok-{n}"),
                Utc::now() + ChronoDuration::seconds(secs),
            )),
            None => Err(Error::auth_refresh(Some(401), "invalid_client")),
        }
    }
}

async fn concurrent_request_auth(
    manager: &Arc<AuthManager>,
    callers: usize,
) -> Vec<Result<itsm_gateway::auth::RequestAuth>> {
    let tasks: Vec<_> = (0..callers)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_request_auth().await })
        })
        .collect();
    futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|task| task.unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_short_lived_credential_is_shared_by_waiters() {
    // 20 s is inside the refresh margin, so the credential is "expired" on
    // arrival; queued callers must still reuse it rather than refresh again.
    let strategy = Arc::new(ScriptedStrategy {
        refreshes: AtomicUsize::new(0),
        lifetime_secs: Some(20),
    });
    let manager = Arc::new(AuthManager::new(strategy.clone(), "https://x.example"));

    for outcome in concurrent_request_auth(&manager, 8).await {
        let auth = outcome.unwrap();
        assert_eq!(auth.headers[AUTHORIZATION], "Bearer tok-1");
        assert_eq!(auth.generation, 1);
    }
    assert_eq!(strategy.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(manager.refresh_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_failed_refresh() {
    let strategy = Arc::new(ScriptedStrategy {
        refreshes: AtomicUsize::new(0),
        lifetime_secs: None,
    });
    let manager = Arc::new(AuthManager::new(strategy.clone(), "https://x.example"));

    for outcome in concurrent_request_auth(&manager, 8).await {
        match outcome.unwrap_err() {
            Error::AuthRefresh { status, message } => {
                assert_eq!(status, Some(401));
                assert_eq!(message, "invalid_client");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(strategy.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(manager.refresh_count(), 1);
}

fn oauth(client_id: &str) -> AuthConfig {
    AuthConfig::Oauth(OAuthConfig {
        client_id: client_id.to_string(),
        client_secret: Secret::new("shh"),
        token_url: None,
        username: None,
        password: None,
    })
}

#[tokio::test]
async fn test_oauth_token_is_fetched_once_and_reused() {
    let stub = spawn_stub().await;
    let client = BackendClient::from_config(stub.server_config(oauth("gateway"))).unwrap();
    let registry = itsm::builtin_registry().unwrap();

    for _ in 0..3 {
        let env = registry
            .invoke("get_incident_by_number", &json!({"incident_number": KNOWN_INCIDENT}), &client)
            .await
            .unwrap();
        assert!(env.success, "{}", env.message);
    }

    assert_eq!(stub.state.token_requests(), 1);
    assert_eq!(stub.state.seen_auth(), vec!["Bearer tok-1"; 3]);
}

#[tokio::test]
async fn test_oauth_refresh_after_401() {
    let stub = spawn_stub().await;
    let client = BackendClient::from_config(stub.server_config(oauth("gateway"))).unwrap();
    stub.state.reject_next.store(1, Ordering::SeqCst);

    let env = itsm::builtin_registry()
        .unwrap()
        .invoke("get_incident_by_number", &json!({"incident_number": KNOWN_INCIDENT}), &client)
        .await
        .unwrap();

    assert!(env.success, "{}", env.message);
    assert_eq!(stub.state.token_requests(), 2);
    assert_eq!(stub.state.seen_auth(), vec!["Bearer tok-1", "Bearer tok-2"]);
}

#[tokio::test]
async fn test_oauth_failure_keeps_status_and_skips_backend() {
    let stub = spawn_stub().await;
    stub.state.token_status.store(401, Ordering::SeqCst);
    let client = BackendClient::from_config(stub.server_config(oauth("gateway"))).unwrap();

    match client.auth().get_request_auth().await.unwrap_err() {
        Error::AuthRefresh { status, .. } => assert_eq!(status, Some(401)),
        other => panic!("unexpected error: {other:?}"),
    }

    let env = itsm::builtin_registry()
        .unwrap()
        .invoke("get_incident_by_number", &json!({"incident_number": KNOWN_INCIDENT}), &client)
        .await
        .unwrap();
    assert!(!env.success);
    assert_eq!(env.error_code.as_deref(), Some("AUTH_REFRESH_FAILED"));
    assert_eq!(stub.state.table_requests(), 0);
}

#[tokio::test]
async fn test_session_cookie_is_presented() {
    let stub = spawn_stub().await;
    let auth = AuthConfig::Session(SessionAuthConfig {
        username: "admin".to_string(),
        password: Secret::new("s3cret"),
        login_path: "/login.do".to_string(),
        session_ttl: Duration::from_secs(600),
    });
    let client = BackendClient::from_config(stub.server_config(auth)).unwrap();

    let auth = client.auth().get_request_auth().await.unwrap();
    assert_eq!(auth.headers["cookie"], "JSESSIONID=session-1");

    let env = itsm::builtin_registry()
        .unwrap()
        .invoke("list_incidents", &json!({"limit": 1}), &client)
        .await
        .unwrap();
    assert!(env.success, "{}", env.message);
    assert_eq!(stub.state.login_requests(), 1);
}

#[tokio::test]
async fn test_api_key_custom_header() {
    let stub = spawn_stub().await;
    let auth = AuthConfig::ApiKey(ApiKeyConfig {
        api_key: Secret::new("key-123"),
        header_name: "x-sn-apikey".to_string(),
    });
    let client = BackendClient::from_config(stub.server_config(auth)).unwrap();

    let auth = client.auth().get_request_auth().await.unwrap();
    assert_eq!(auth.headers["x-sn-apikey"], "key-123");
    assert!(auth.headers.get(AUTHORIZATION).is_none());
}
