//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. Every variant maps to a stable
//! `error_code()` that is surfaced in failed tool envelopes.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    /// A required parameter was absent (or null) in the payload.
    #[error("missing required field: {field}")]
    MissingField { field: String },

    /// A parameter was present but could not be coerced to its declared type.
    #[error("field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// No tool is registered under this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A tool with this name is already registered.
    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    /// The deployment profile is not declared in the package mapping.
    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    /// A profile references a tool that is not registered.
    #[error("profile '{profile}' references unregistered tool '{tool}'")]
    DanglingToolReference { profile: String, tool: String },

    /// The superset profile is missing tools declared elsewhere.
    #[error("profile '{profile}' is not a superset, missing: {}", missing.join(", "))]
    ProfileNotSuperset { profile: String, missing: Vec<String> },

    /// The tool exists but is not enabled for the active profile.
    #[error("tool '{tool}' is not enabled in profile '{profile}'")]
    ToolNotEnabled { profile: String, tool: String },

    /// Credential acquisition failed (identity endpoint or login).
    #[error("auth refresh failed{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    AuthRefresh {
        status: Option<u16>,
        message: String,
    },

    /// The backend could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend did not answer within the configured timeout.
    #[error("backend timeout: {0}")]
    BackendTimeout(String),

    /// The backend answered with a non-2xx status.
    #[error("backend rejected request (status {status}): {message}")]
    BackendRejected { status: u16, message: String },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML package file errors.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code for envelopes and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::MissingField { .. } => "MISSING_FIELD",
            Error::TypeMismatch { .. } => "TYPE_MISMATCH",
            Error::UnknownTool(_) => "UNKNOWN_TOOL",
            Error::DuplicateTool(_) => "DUPLICATE_TOOL",
            Error::UnknownProfile(_) => "UNKNOWN_PROFILE",
            Error::DanglingToolReference { .. } => "DANGLING_TOOL_REFERENCE",
            Error::ProfileNotSuperset { .. } => "PROFILE_NOT_SUPERSET",
            Error::ToolNotEnabled { .. } => "TOOL_NOT_ENABLED",
            Error::AuthRefresh { .. } => "AUTH_REFRESH_FAILED",
            Error::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Error::BackendTimeout(_) => "BACKEND_TIMEOUT",
            Error::BackendRejected { .. } => "BACKEND_REJECTED",
            Error::Config(_) => "CONFIG",
            Error::Internal(_) | Error::Io(_) => "INTERNAL",
            Error::Serialization(_) | Error::Yaml(_) => "SERIALIZATION",
        }
    }

    /// True for parameter validation failures (call never attempted).
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::MissingField { .. } | Error::TypeMismatch { .. })
    }
}

// Convenience constructors
impl Error {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn auth_refresh(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::AuthRefresh {
            status,
            message: msg.into(),
        }
    }

    pub fn backend_rejected(status: u16, msg: impl Into<String>) -> Self {
        Self::BackendRejected {
            status,
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

// Map transport failures onto the backend taxonomy so `?` works in clients.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::BackendTimeout(err.to_string())
        } else if let Some(status) = err.status() {
            Error::backend_rejected(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            Error::internal(format!("invalid backend response: {}", err))
        } else {
            Error::BackendUnavailable(err.to_string())
        }
    }
}
