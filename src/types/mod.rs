//! Core types for the gateway.
//!
//! - **IDs**: invocation correlation ids
//! - **Errors**: the gateway error taxonomy with thiserror derives
//! - **Config**: backend connection, authentication and package configuration

mod config;
mod errors;
mod ids;

pub use config::{
    config_schema, ApiKeyConfig, AuthConfig, AuthKind, BasicAuthConfig, Config, OAuthConfig,
    PackageConfig, Secret, ServerConfig, SessionAuthConfig, DEFAULT_PROFILE,
    DEFAULT_SESSION_TTL, DEFAULT_TIMEOUT,
};
pub use errors::{Error, Result};
pub use ids::InvocationId;
