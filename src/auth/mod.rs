//! Backend authentication: credential strategies and the caching manager.
//!
//! Strategies know *how* to obtain and present credentials; the
//! [`AuthManager`] decides *when* to refresh and makes sure concurrent callers
//! share a single refresh.

pub mod manager;
pub mod strategy;

pub use manager::{AuthManager, RequestAuth};
pub use strategy::{
    build_strategy, ApiKeyStrategy, BasicStrategy, Credential, CredentialStrategy, OAuthStrategy,
    SessionStrategy, DEFAULT_TOKEN_LIFETIME_SECS, REFRESH_MARGIN_SECS,
};
