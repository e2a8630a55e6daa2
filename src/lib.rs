//! # ITSM Gateway - schema-validated tools over an ITSM table API
//!
//! Exposes operations against a ServiceNow-style backend as named tools an
//! automated agent can call:
//! - Typed parameter contracts with validation, coercion and JSON Schema export
//! - An explicit tool registry that dispatches calls and normalizes results
//!   into a uniform envelope
//! - Pluggable backend authentication (basic, API key, OAuth, session cookie)
//!   with a cached, single-flight refreshed credential
//! - Deployment profiles restricting which tools are exposed
//!
//! ## Architecture
//!
//! ```text
//!   (tool, params, profile)
//!            │
//!   ┌────────▼────────┐   ┌───────────────┐
//!   │  RegistryView   │──▶│ ToolRegistry  │── validate ──▶ ParamContract
//!   │ (ToolPackages)  │   │  (dispatch)   │
//!   └─────────────────┘   └───────┬───────┘
//!                                 │ BackendClient
//!                         ┌───────▼───────┐   ┌───────────────────┐
//!                         │  tool impl    │──▶│   AuthManager     │
//!                         │ (itsm::*)     │   │ CredentialStrategy│
//!                         └───────┬───────┘   └───────────────────┘
//!                                 ▼
//!                            ToolEnvelope
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod auth;
pub mod backend;
pub mod itsm;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;

pub use backend::BackendClient;
pub use tools::{ToolEnvelope, ToolPackages, ToolRegistry};
pub use types::{Config, Error, Result};
