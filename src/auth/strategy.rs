//! Credential strategies: one per authentication mechanism.
//!
//! Each strategy owns its long-lived configuration, knows how to derive a
//! [`Credential`] from it (`refresh`), and how to turn that credential into
//! outbound request headers (`produce_headers`, pure).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use crate::types::{
    ApiKeyConfig, AuthConfig, AuthKind, BasicAuthConfig, Error, OAuthConfig, Result, Secret,
    ServerConfig, SessionAuthConfig,
};

/// Credentials expiring within this window are treated as already expired.
pub const REFRESH_MARGIN_SECS: i64 = 30;

/// Token lifetime assumed when the identity endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 1800;

// =============================================================================
// Derived credential
// =============================================================================

/// A derived credential: the header/cookie material plus its expiry.
///
/// The meaning of `value` is strategy-specific (a pre-encoded basic header,
/// a bearer token, a cookie string).
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub value: Secret,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn non_expiring(value: impl Into<String>) -> Self {
        Self {
            value: Secret::new(value),
            expires_at: None,
        }
    }

    pub fn expiring(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: Secret::new(value),
            expires_at: Some(expires_at),
        }
    }
}

/// True when `expires_at` falls inside the refresh margin relative to `now`.
pub fn expires_within_margin(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expires_at.map_or(false, |exp| exp - Duration::seconds(REFRESH_MARGIN_SECS) <= now)
}

// =============================================================================
// Strategy trait
// =============================================================================

/// Authentication mechanism used by the [`AuthManager`](super::AuthManager).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStrategy: Send + Sync {
    fn kind(&self) -> AuthKind;

    /// Render request headers for a credential. No I/O.
    fn produce_headers(&self, credential: &Credential) -> Result<HeaderMap>;

    fn is_expired(&self, credential: &Credential, now: DateTime<Utc>) -> bool {
        expires_within_margin(credential.expires_at, now)
    }

    /// Obtain a fresh credential (may perform network I/O).
    async fn refresh(&self) -> Result<Credential>;
}

fn header_value(raw: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(raw)
        .map_err(|e| Error::config(format!("credential is not a valid header value: {}", e)))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Build the strategy matching the configured auth kind.
pub fn build_strategy(config: &ServerConfig) -> Result<Arc<dyn CredentialStrategy>> {
    let strategy: Arc<dyn CredentialStrategy> = match &config.auth {
        AuthConfig::Basic(c) => Arc::new(BasicStrategy::new(c.clone())),
        AuthConfig::ApiKey(c) => Arc::new(ApiKeyStrategy::new(c.clone())?),
        AuthConfig::Oauth(c) => Arc::new(OAuthStrategy::new(
            c.clone(),
            config.base_url(),
            identity_client(config, reqwest::redirect::Policy::default())?,
        )),
        AuthConfig::Session(c) => Arc::new(SessionStrategy::new(
            c.clone(),
            config.base_url(),
            // Set-Cookie lives on the login redirect itself.
            identity_client(config, reqwest::redirect::Policy::none())?,
        )),
    };
    Ok(strategy)
}

fn identity_client(
    config: &ServerConfig,
    redirect: reqwest::redirect::Policy,
) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .redirect(redirect)
        .build()
        .map_err(|e| Error::config(format!("failed to build identity client: {}", e)))
}

// =============================================================================
// Basic
// =============================================================================

/// HTTP Basic authentication. The credential never expires.
#[derive(Debug, Clone)]
pub struct BasicStrategy {
    config: BasicAuthConfig,
}

impl BasicStrategy {
    pub fn new(config: BasicAuthConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CredentialStrategy for BasicStrategy {
    fn kind(&self) -> AuthKind {
        AuthKind::Basic
    }

    fn produce_headers(&self, credential: &Credential) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(credential.value.expose())?);
        Ok(headers)
    }

    fn is_expired(&self, _credential: &Credential, _now: DateTime<Utc>) -> bool {
        false
    }

    async fn refresh(&self) -> Result<Credential> {
        let raw = format!("{}:{}", self.config.username, self.config.password.expose());
        Ok(Credential::non_expiring(format!("Basic {}", STANDARD.encode(raw))))
    }
}

// =============================================================================
// API key / static bearer token
// =============================================================================

/// Static API key. `Authorization` carries `Bearer <key>`; any other header
/// name carries the raw key.
#[derive(Debug, Clone)]
pub struct ApiKeyStrategy {
    config: ApiKeyConfig,
    header: HeaderName,
}

impl ApiKeyStrategy {
    pub fn new(config: ApiKeyConfig) -> Result<Self> {
        let header = HeaderName::from_bytes(config.header_name.as_bytes()).map_err(|e| {
            Error::config(format!("invalid api key header '{}': {}", config.header_name, e))
        })?;
        Ok(Self { config, header })
    }
}

#[async_trait]
impl CredentialStrategy for ApiKeyStrategy {
    fn kind(&self) -> AuthKind {
        AuthKind::ApiKey
    }

    fn produce_headers(&self, credential: &Credential) -> Result<HeaderMap> {
        let rendered = if self.header == AUTHORIZATION {
            format!("Bearer {}", credential.value.expose())
        } else {
            credential.value.expose().to_string()
        };
        let mut headers = HeaderMap::new();
        headers.insert(self.header.clone(), header_value(&rendered)?);
        Ok(headers)
    }

    fn is_expired(&self, _credential: &Credential, _now: DateTime<Utc>) -> bool {
        false
    }

    async fn refresh(&self) -> Result<Credential> {
        Ok(Credential::non_expiring(self.config.api_key.expose()))
    }
}

// =============================================================================
// OAuth
// =============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OAuth token exchange against the instance's identity endpoint.
pub struct OAuthStrategy {
    config: OAuthConfig,
    token_url: String,
    http: reqwest::Client,
}

impl OAuthStrategy {
    pub fn new(config: OAuthConfig, base_url: &str, http: reqwest::Client) -> Self {
        let token_url = config
            .token_url
            .clone()
            .unwrap_or_else(|| format!("{}/oauth_token.do", base_url.trim_end_matches('/')));
        Self {
            config,
            token_url,
            http,
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    fn grant_form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.expose().to_string()),
        ];
        match (&self.config.username, &self.config.password) {
            (Some(username), Some(password)) => {
                form.push(("grant_type", "password".to_string()));
                form.push(("username", username.clone()));
                form.push(("password", password.expose().to_string()));
            }
            _ => form.push(("grant_type", "client_credentials".to_string())),
        }
        form
    }
}

impl fmt::Debug for OAuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthStrategy")
            .field("client_id", &self.config.client_id)
            .field("token_url", &self.token_url)
            .finish()
    }
}

#[async_trait]
impl CredentialStrategy for OAuthStrategy {
    fn kind(&self) -> AuthKind {
        AuthKind::Oauth
    }

    fn produce_headers(&self, credential: &Credential) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", credential.value.expose()))?,
        );
        Ok(headers)
    }

    async fn refresh(&self) -> Result<Credential> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&self.grant_form())
            .send()
            .await
            .map_err(|e| Error::auth_refresh(None, format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::auth_refresh(Some(status.as_u16()), body));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            Error::auth_refresh(Some(status.as_u16()), format!("malformed token response: {}", e))
        })?;
        if token.access_token.is_empty() {
            return Err(Error::auth_refresh(
                Some(status.as_u16()),
                "token response carried an empty access_token",
            ));
        }

        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        if lifetime <= REFRESH_MARGIN_SECS {
            tracing::warn!(lifetime, "access token expires within the refresh margin");
        }
        let expires_at = Utc::now() + Duration::seconds(lifetime);
        tracing::debug!(token_url = %self.token_url, lifetime, "obtained oauth access token");
        Ok(Credential::expiring(token.access_token, expires_at))
    }
}

// =============================================================================
// Session cookie
// =============================================================================

/// Form login that yields session cookies, trusted for `session_ttl`.
pub struct SessionStrategy {
    config: SessionAuthConfig,
    login_url: String,
    http: reqwest::Client,
}

impl SessionStrategy {
    pub fn new(config: SessionAuthConfig, base_url: &str, http: reqwest::Client) -> Self {
        let login_url = format!("{}{}", base_url.trim_end_matches('/'), config.login_path);
        Self {
            config,
            login_url,
            http,
        }
    }
}

impl fmt::Debug for SessionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStrategy")
            .field("username", &self.config.username)
            .field("login_url", &self.login_url)
            .finish()
    }
}

/// Extract `name=value` pairs from `Set-Cookie` headers into a `Cookie` header value.
fn collect_cookies(headers: &HeaderMap) -> String {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl CredentialStrategy for SessionStrategy {
    fn kind(&self) -> AuthKind {
        AuthKind::Session
    }

    fn produce_headers(&self, credential: &Credential) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, header_value(credential.value.expose())?);
        Ok(headers)
    }

    async fn refresh(&self) -> Result<Credential> {
        let form = [
            ("user_name", self.config.username.as_str()),
            ("user_password", self.config.password.expose()),
            ("sys_action", "sysverb_login"),
        ];
        let response = self
            .http
            .post(&self.login_url)
            .basic_auth(&self.config.username, Some(self.config.password.expose()))
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::auth_refresh(None, format!("login request failed: {}", e)))?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::auth_refresh(Some(status.as_u16()), body));
        }

        let cookies = collect_cookies(response.headers());
        if cookies.is_empty() {
            return Err(Error::auth_refresh(
                Some(status.as_u16()),
                "login response did not set any session cookie",
            ));
        }

        let ttl = Duration::from_std(self.config.session_ttl)
            .map_err(|e| Error::config(format!("session_ttl out of range: {}", e)))?;
        tracing::debug!(login_url = %self.login_url, "established backend session");
        Ok(Credential::expiring(cookies, Utc::now() + ttl))
    }
}
