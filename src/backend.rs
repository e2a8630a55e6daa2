//! Backend client for the ITSM table REST API.
//!
//! Every request asks the [`AuthManager`] for fresh headers first. A 401
//! marks the credential that was used as rejected and the request is sent
//! once more with a refreshed credential; a second 401 is reported as
//! `BackendRejected`. There is no other retry.

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::auth::AuthManager;
use crate::types::{Error, Result, ServerConfig};

/// Connection handle passed to tool implementations: connection config,
/// live auth manager and a pooled HTTP client.
#[derive(Clone)]
pub struct BackendClient {
    config: Arc<ServerConfig>,
    auth: Arc<AuthManager>,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(config: Arc<ServerConfig>, auth: Arc<AuthManager>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build http client: {}", e)))?;
        Ok(Self { config, auth, http })
    }

    /// Validate `config`, build its auth manager and the client.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let auth = Arc::new(AuthManager::from_config(&config)?);
        Self::new(Arc::new(config), auth)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    /// `GET /api/now/table/<table>` and return the `result` member.
    pub async fn get_table(&self, table: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.config.table_url(table);
        self.send(|http| http.get(&url).query(query)).await
    }

    /// `POST /api/now/table/<table>` with a JSON body and return the `result` member.
    pub async fn post_table(&self, table: &str, body: &Value) -> Result<Value> {
        let url = self.config.table_url(table);
        self.send(|http| http.post(&url).json(body)).await
    }

    async fn send<F>(&self, build: F) -> Result<Value>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut retried_after_401 = false;
        loop {
            let auth = self.auth.get_request_auth().await?;
            let request = auth.apply(build(&self.http)).header(ACCEPT, "application/json");
            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !retried_after_401 {
                tracing::debug!(generation = auth.generation, "backend returned 401, refreshing credential");
                self.auth.invalidate_generation(auth.generation).await;
                retried_after_401 = true;
                continue;
            }

            let body = response.text().await?;
            if !status.is_success() {
                return Err(Error::backend_rejected(status.as_u16(), error_message(&body)));
            }

            let mut parsed: Value = serde_json::from_str(&body)
                .map_err(|e| Error::internal(format!("backend returned invalid JSON: {}", e)))?;
            return Ok(match parsed.get_mut("result") {
                Some(result) => result.take(),
                None => parsed,
            });
        }
    }
}

/// Pull the human-readable message out of a table API error body.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let message = error.and_then(|e| e.get("message")).and_then(Value::as_str);
    let detail = error.and_then(|e| e.get("detail")).and_then(Value::as_str);
    match (message, detail) {
        (Some(m), Some(d)) if !d.is_empty() => format!("{}: {}", m, d),
        (Some(m), _) => m.to_string(),
        _ if body.is_empty() => "empty response body".to_string(),
        _ => body.chars().take(512).collect(),
    }
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("instance_url", &self.config.instance_url)
            .field("auth", &self.auth)
            .finish()
    }
}
