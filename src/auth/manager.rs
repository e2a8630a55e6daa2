//! Authentication manager: credential cache with single-flight refresh.
//!
//! Tool implementations call [`AuthManager::get_request_auth`] right before
//! every backend request. The cached credential is refreshed when missing,
//! expired (within the strategy's margin) or invalidated after a 401.
//!
//! Refresh is a critical section: concurrent callers that observe a stale
//! credential queue on `refresh_lock`, and whoever gets in first performs the
//! refresh. Everyone queued behind it reuses that attempt's outcome, success
//! or failure, instead of hitting the identity endpoint again. The cache slot
//! is only written once a new credential is fully computed, so dropping a
//! caller mid-refresh leaves the previous credential in place.

use chrono::Utc;
use reqwest::header::HeaderMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::strategy::{build_strategy, Credential, CredentialStrategy};
use crate::types::{AuthKind, Error, Result, ServerConfig};

/// Headers for one outbound request, tagged with the credential generation
/// they were rendered from.
#[derive(Clone)]
pub struct RequestAuth {
    pub headers: HeaderMap,
    pub generation: u64,
}

impl RequestAuth {
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.headers(self.headers.clone())
    }
}

impl fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.keys().map(|k| k.as_str()).collect();
        f.debug_struct("RequestAuth")
            .field("headers", &names)
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug, Default)]
struct CacheSlot {
    credential: Option<Arc<Credential>>,
    /// Bumped on every successful refresh.
    generation: u64,
    stale: bool,
    /// Number of refresh attempts that have finished, successfully or not.
    completed_attempts: u64,
    last_failure: Option<(Option<u16>, String)>,
}

/// Holds the active strategy and its cached derived credential.
pub struct AuthManager {
    strategy: Arc<dyn CredentialStrategy>,
    base_url: String,
    cache: RwLock<CacheSlot>,
    refresh_lock: Mutex<()>,
    refreshes: AtomicU64,
}

impl AuthManager {
    pub fn new(strategy: Arc<dyn CredentialStrategy>, base_url: impl Into<String>) -> Self {
        Self {
            strategy,
            base_url: base_url.into(),
            cache: RwLock::new(CacheSlot::default()),
            refresh_lock: Mutex::new(()),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Build a manager with the strategy matching `config.auth`.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(Self::new(build_strategy(config)?, config.base_url()))
    }

    pub fn kind(&self) -> AuthKind {
        self.strategy.kind()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Number of refresh calls issued against the strategy so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Headers (and cookies) to attach to the next backend request.
    pub async fn get_request_auth(&self) -> Result<RequestAuth> {
        let (credential, generation) = self.current_credential().await?;
        Ok(RequestAuth {
            headers: self.strategy.produce_headers(&credential)?,
            generation,
        })
    }

    /// Force the next caller to refresh, for every holder of the credential.
    ///
    /// The old credential stays cached until its replacement is computed.
    pub async fn invalidate(&self) {
        let mut slot = self.cache.write().await;
        if slot.credential.is_some() {
            tracing::info!(auth = self.kind().as_str(), "credential invalidated");
        }
        slot.stale = true;
    }

    /// Invalidate only if `generation` is still the cached one. Used after a
    /// 401 so that a burst of rejected requests triggers one refresh, not many.
    pub async fn invalidate_generation(&self, generation: u64) -> bool {
        let mut slot = self.cache.write().await;
        if slot.generation == generation && !slot.stale {
            tracing::info!(auth = self.kind().as_str(), generation, "credential rejected by backend");
            slot.stale = true;
            true
        } else {
            false
        }
    }

    async fn fresh_cached(&self) -> Option<(Arc<Credential>, u64)> {
        let slot = self.cache.read().await;
        match &slot.credential {
            Some(credential) if !slot.stale && !self.strategy.is_expired(credential, Utc::now()) => {
                Some((credential.clone(), slot.generation))
            }
            _ => None,
        }
    }

    async fn current_credential(&self) -> Result<(Arc<Credential>, u64)> {
        if let Some(hit) = self.fresh_cached().await {
            return Ok(hit);
        }

        let attempts_before = self.cache.read().await.completed_attempts;
        let _guard = self.refresh_lock.lock().await;

        // Whoever held the lock before us may already have done the work.
        if let Some(hit) = self.fresh_cached().await {
            return Ok(hit);
        }
        {
            // An attempt finished while we queued: take its outcome as is,
            // even when the new credential is already inside the margin.
            let slot = self.cache.read().await;
            if slot.completed_attempts != attempts_before {
                if let Some((status, message)) = &slot.last_failure {
                    return Err(Error::auth_refresh(*status, message.clone()));
                }
                if let Some(credential) = slot.credential.as_ref().filter(|_| !slot.stale) {
                    return Ok((credential.clone(), slot.generation));
                }
            }
        }

        self.refreshes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(auth = self.kind().as_str(), "refreshing credential");
        let outcome = self.strategy.refresh().await;

        let mut slot = self.cache.write().await;
        slot.completed_attempts += 1;
        match outcome {
            Ok(credential) => {
                let credential = Arc::new(credential);
                slot.generation += 1;
                slot.credential = Some(credential.clone());
                slot.stale = false;
                slot.last_failure = None;
                tracing::debug!(
                    auth = self.kind().as_str(),
                    generation = slot.generation,
                    expires_at = ?credential.expires_at,
                    "credential refreshed"
                );
                Ok((credential, slot.generation))
            }
            Err(err) => {
                let (status, message) = match err {
                    Error::AuthRefresh { status, message } => (status, message),
                    other => (None, other.to_string()),
                };
                tracing::warn!(auth = self.kind().as_str(), ?status, %message, "credential refresh failed");
                slot.last_failure = Some((status, message.clone()));
                Err(Error::auth_refresh(status, message))
            }
        }
    }
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthManager")
            .field("kind", &self.strategy.kind())
            .field("base_url", &self.base_url)
            .field("refreshes", &self.refresh_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::strategy::MockCredentialStrategy;
    use chrono::Duration;
    use reqwest::header::{HeaderValue, AUTHORIZATION};

    fn bearer_headers(credential: &Credential) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", credential.value.expose())).unwrap(),
        );
        Ok(headers)
    }

    fn mock_strategy() -> MockCredentialStrategy {
        let mut mock = MockCredentialStrategy::new();
        mock.expect_kind().return_const(AuthKind::Oauth);
        mock.expect_produce_headers().returning(bearer_headers);
        mock.expect_is_expired()
            .returning(|c, now| crate::auth::strategy::expires_within_margin(c.expires_at, now));
        mock
    }

    #[tokio::test]
    async fn test_first_call_refreshes_then_caches() {
        let mut mock = mock_strategy();
        mock.expect_refresh()
            .times(1)
            .returning(|| Ok(Credential::expiring("tok-1", Utc::now() + Duration::hours(1))));
        let manager = AuthManager::new(Arc::new(mock), "https://x.example");

        let first = manager.get_request_auth().await.unwrap();
        let second = manager.get_request_auth().await.unwrap();
        assert_eq!(first.headers[AUTHORIZATION], "Bearer tok-1");
        assert_eq!(second.generation, first.generation);
        assert_eq!(manager.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let mut mock = mock_strategy();
        let mut seq = mockall::Sequence::new();
        mock.expect_refresh()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Credential::expiring("old", Utc::now() + Duration::hours(1))));
        mock.expect_refresh()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Credential::expiring("new", Utc::now() + Duration::hours(1))));
        let manager = AuthManager::new(Arc::new(mock), "https://x.example");

        let before = manager.get_request_auth().await.unwrap();
        manager.invalidate().await;
        let after = manager.get_request_auth().await.unwrap();
        assert_eq!(after.headers[AUTHORIZATION], "Bearer new");
        assert_eq!(after.generation, before.generation + 1);
    }

    #[tokio::test]
    async fn test_invalidate_generation_ignores_superseded_credentials() {
        let mut mock = mock_strategy();
        mock.expect_refresh()
            .times(2)
            .returning(|| Ok(Credential::expiring("tok", Utc::now() + Duration::hours(1))));
        let manager = AuthManager::new(Arc::new(mock), "https://x.example");

        let first = manager.get_request_auth().await.unwrap();
        assert!(manager.invalidate_generation(first.generation).await);
        // A second 401 observed with the same generation does not re-flag.
        assert!(!manager.invalidate_generation(first.generation).await);

        let second = manager.get_request_auth().await.unwrap();
        assert!(!manager.invalidate_generation(first.generation).await);
        assert_eq!(second.generation, first.generation + 1);
        assert_eq!(manager.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_credential_refreshed() {
        let mut mock = mock_strategy();
        let mut seq = mockall::Sequence::new();
        mock.expect_refresh()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Credential::expiring("stale", Utc::now() - Duration::seconds(1))));
        mock.expect_refresh()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Credential::expiring("fresh", Utc::now() + Duration::hours(1))));
        let manager = AuthManager::new(Arc::new(mock), "https://x.example");

        manager.get_request_auth().await.unwrap();
        let auth = manager.get_request_auth().await.unwrap();
        assert_eq!(auth.headers[AUTHORIZATION], "Bearer fresh");
    }

    #[tokio::test]
    async fn test_refresh_failure_propagates_and_keeps_status() {
        let mut mock = mock_strategy();
        mock.expect_refresh()
            .returning(|| Err(Error::auth_refresh(Some(401), "invalid_client")));
        let manager = AuthManager::new(Arc::new(mock), "https://x.example");

        match manager.get_request_auth().await.unwrap_err() {
            Error::AuthRefresh { status, message } => {
                assert_eq!(status, Some(401));
                assert_eq!(message, "invalid_client");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Not retried behind the caller's back; the next call tries again.
        assert!(manager.get_request_auth().await.is_err());
        assert_eq!(manager.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_request_auth_debug_hides_values() {
        let mut mock = mock_strategy();
        mock.expect_refresh()
            .returning(|| Ok(Credential::non_expiring("super-secret")));
        let manager = AuthManager::new(Arc::new(mock), "https://x.example");
        let auth = manager.get_request_auth().await.unwrap();
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("authorization"));
        assert!(!rendered.contains("super-secret"));
    }
}
