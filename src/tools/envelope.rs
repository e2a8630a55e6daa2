//! Uniform tool result envelope: `{success, message, data?, error_code?}`.

use crate::types::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result shape returned by every tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Machine-readable failure category (see `Error::error_code`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ToolEnvelope {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error_code: None,
        }
    }

    pub fn success_without_data(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error_code: None,
        }
    }

    /// Expected failure reported by an implementation (e.g. record not found).
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error_code: None,
        }
    }

    pub fn failure_with_code(code: &str, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.to_string()),
            ..Self::failure(message)
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self::failure_with_code(err.error_code(), err.to_string())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
