//! Configuration structures.
//!
//! Configuration is loaded from environment variables (see [`Config::from_env`])
//! or deserialized from any serde source. Secrets are wrapped in [`Secret`] so
//! they never show up in `Debug` output or logs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::errors::{self, Error};
use crate::auth::REFRESH_MARGIN_SECS;

/// Default connection timeout for backend calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default session lifetime when the backend does not advertise one.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(1800);

/// Default profile when none is configured.
pub const DEFAULT_PROFILE: &str = "full";

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Backend connection configuration.
    pub server: ServerConfig,

    /// Tool package (deployment profile) configuration.
    #[serde(default)]
    pub packages: PackageConfig,
}

/// Backend connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ServerConfig {
    /// Base URL of the ITSM instance, e.g. `https://example.service-now.com`.
    pub instance_url: String,

    /// Per-request timeout for backend and identity calls.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    #[schemars(with = "String")]
    pub timeout: Duration,

    /// Authentication configuration.
    pub auth: AuthConfig,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl ServerConfig {
    /// Instance URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.instance_url.trim_end_matches('/')
    }

    /// URL of a table endpoint on the backend.
    pub fn table_url(&self, table: &str) -> String {
        format!("{}/api/now/table/{}", self.base_url(), table)
    }

    pub fn validate(&self) -> errors::Result<()> {
        if self.instance_url.trim().is_empty() {
            return Err(Error::config("instance_url cannot be empty"));
        }
        if !(self.instance_url.starts_with("http://") || self.instance_url.starts_with("https://"))
        {
            return Err(Error::config(format!(
                "instance_url must be an http(s) URL, got '{}'",
                self.instance_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be positive"));
        }
        self.auth.validate()
    }
}

/// Tool package configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PackageConfig {
    /// Path to the YAML package mapping. Built-in packages are used when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Active deployment profile.
    #[serde(default = "default_profile")]
    pub profile: String,
}

fn default_profile() -> String {
    DEFAULT_PROFILE.to_string()
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            path: None,
            profile: default_profile(),
        }
    }
}

// =============================================================================
// Authentication configuration
// =============================================================================

/// A secret string. Serializes transparently, never prints.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Authentication kind, one per credential strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Basic,
    ApiKey,
    Oauth,
    Session,
}

impl AuthKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthKind::Basic => "basic",
            AuthKind::ApiKey => "api_key",
            AuthKind::Oauth => "oauth",
            AuthKind::Session => "session",
        }
    }
}

impl std::str::FromStr for AuthKind {
    type Err = Error;

    fn from_str(s: &str) -> errors::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(AuthKind::Basic),
            "api_key" | "apikey" | "token" => Ok(AuthKind::ApiKey),
            "oauth" => Ok(AuthKind::Oauth),
            "session" | "cookie" => Ok(AuthKind::Session),
            other => Err(Error::config(format!("unsupported auth type: {}", other))),
        }
    }
}

/// Authentication configuration: exactly one variant per connection.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    Basic(BasicAuthConfig),
    ApiKey(ApiKeyConfig),
    Oauth(OAuthConfig),
    Session(SessionAuthConfig),
}

impl AuthConfig {
    pub fn kind(&self) -> AuthKind {
        match self {
            AuthConfig::Basic(_) => AuthKind::Basic,
            AuthConfig::ApiKey(_) => AuthKind::ApiKey,
            AuthConfig::Oauth(_) => AuthKind::Oauth,
            AuthConfig::Session(_) => AuthKind::Session,
        }
    }

    pub fn validate(&self) -> errors::Result<()> {
        match self {
            AuthConfig::Basic(c) => {
                require(&c.username, "basic.username")?;
                require(c.password.expose(), "basic.password")
            }
            AuthConfig::ApiKey(c) => {
                require(c.api_key.expose(), "api_key.api_key")?;
                require(&c.header_name, "api_key.header_name")
            }
            AuthConfig::Oauth(c) => {
                require(&c.client_id, "oauth.client_id")?;
                require(c.client_secret.expose(), "oauth.client_secret")?;
                if c.username.is_some() != c.password.is_some() {
                    return Err(Error::config(
                        "oauth.username and oauth.password must be set together",
                    ));
                }
                Ok(())
            }
            AuthConfig::Session(c) => {
                require(&c.username, "session.username")?;
                require(c.password.expose(), "session.password")?;
                let margin = REFRESH_MARGIN_SECS.unsigned_abs();
                if c.session_ttl.as_secs() <= margin {
                    return Err(Error::config(format!(
                        "session.session_ttl must exceed the {}s refresh margin",
                        margin
                    )));
                }
                Ok(())
            }
        }
    }
}

fn require(value: &str, field: &str) -> errors::Result<()> {
    if value.trim().is_empty() {
        return Err(Error::config(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// HTTP Basic credentials.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: Secret,
}

/// Static API key / bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiKeyConfig {
    pub api_key: Secret,

    /// Header carrying the key. `Authorization` sends `Bearer <key>`.
    #[serde(default = "default_api_key_header")]
    pub header_name: String,
}

fn default_api_key_header() -> String {
    "Authorization".to_string()
}

/// OAuth client credentials (password grant when user credentials are set).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret,

    /// Token endpoint. Defaults to `<instance_url>/oauth_token.do`.
    #[serde(default)]
    pub token_url: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<Secret>,
}

/// Session cookie login.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionAuthConfig {
    pub username: String,
    pub password: Secret,

    /// Login path relative to the instance URL.
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// How long an established session is trusted before re-login.
    #[serde(with = "humantime_serde", default = "default_session_ttl")]
    #[schemars(with = "String")]
    pub session_ttl: Duration,
}

fn default_login_path() -> String {
    "/login.do".to_string()
}

fn default_session_ttl() -> Duration {
    DEFAULT_SESSION_TTL
}

// =============================================================================
// Environment loading
// =============================================================================

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> errors::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup (testable without
    /// touching the process environment).
    pub fn from_lookup<F>(lookup: F) -> errors::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let need = |key: &str| {
            get(key).ok_or_else(|| Error::config(format!("environment variable {} is not set", key)))
        };

        let instance_url = need("SERVICENOW_INSTANCE_URL")?;
        let timeout = match get("SERVICENOW_TIMEOUT") {
            Some(raw) => Duration::from_secs(parse_secs(&raw, "SERVICENOW_TIMEOUT")?),
            None => DEFAULT_TIMEOUT,
        };

        let kind: AuthKind = get("SERVICENOW_AUTH_TYPE")
            .as_deref()
            .unwrap_or("basic")
            .parse()?;

        let auth = match kind {
            AuthKind::Basic => AuthConfig::Basic(BasicAuthConfig {
                username: need("SERVICENOW_USERNAME")?,
                password: Secret::new(need("SERVICENOW_PASSWORD")?),
            }),
            AuthKind::ApiKey => AuthConfig::ApiKey(ApiKeyConfig {
                api_key: Secret::new(need("SERVICENOW_API_KEY")?),
                header_name: get("SERVICENOW_API_KEY_HEADER")
                    .unwrap_or_else(default_api_key_header),
            }),
            AuthKind::Oauth => AuthConfig::Oauth(OAuthConfig {
                client_id: need("SERVICENOW_CLIENT_ID")?,
                client_secret: Secret::new(need("SERVICENOW_CLIENT_SECRET")?),
                token_url: get("SERVICENOW_TOKEN_URL"),
                username: get("SERVICENOW_USERNAME"),
                password: get("SERVICENOW_PASSWORD").map(Secret::new),
            }),
            AuthKind::Session => AuthConfig::Session(SessionAuthConfig {
                username: need("SERVICENOW_USERNAME")?,
                password: Secret::new(need("SERVICENOW_PASSWORD")?),
                login_path: get("SERVICENOW_LOGIN_PATH").unwrap_or_else(default_login_path),
                session_ttl: match get("SERVICENOW_SESSION_TTL") {
                    Some(raw) => Duration::from_secs(parse_secs(&raw, "SERVICENOW_SESSION_TTL")?),
                    None => DEFAULT_SESSION_TTL,
                },
            }),
        };

        let server = ServerConfig {
            instance_url,
            timeout,
            auth,
        };
        server.validate()?;

        let packages = PackageConfig {
            path: get("TOOL_PACKAGE_CONFIG_PATH").map(PathBuf::from),
            profile: get("MCP_TOOL_PACKAGE").unwrap_or_else(default_profile),
        };

        Ok(Self { server, packages })
    }
}

fn parse_secs(raw: &str, key: &str) -> errors::Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::config(format!("{} must be a whole number of seconds, got '{}'", key, raw)))
}

/// JSON schema describing [`Config`], for documentation and tooling.
pub fn config_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(Config);
    serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
}
