//! Tool registry and dispatcher.
//!
//! The registry owns tool *descriptors*: implementation, parameter contract,
//! result contract, description and serialization mode. It is built once at
//! startup through explicit `register` calls and shared read-only afterwards.
//!
//! `invoke` is the only way an agent reaches an implementation. It validates
//! the payload, calls the implementation with a [`BackendClient`], and
//! normalizes whatever happens (expected failures, backend errors, panics)
//! into a [`ToolEnvelope`]. The only error it ever returns is `UnknownTool`.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use super::envelope::ToolEnvelope;
use super::schema::{ParamContract, ToolParams};
use crate::backend::BackendClient;
use crate::types::{Error, InvocationId, Result};

/// Boxed future returned by tool implementations.
pub type ToolFuture = BoxFuture<'static, Result<ToolEnvelope>>;

/// Type-erased tool implementation.
pub type ToolHandler = Arc<dyn Fn(BackendClient, ToolParams) -> ToolFuture + Send + Sync>;

// =============================================================================
// Descriptor
// =============================================================================

/// How a tool's result is normalized before it reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationMode {
    /// `data` is passed through untouched.
    Raw,
    /// `data` must be a JSON object and satisfy the result schema, if any.
    Structured,
}

/// Declared shape of a tool's `data`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultContract {
    /// JSON Schema enforced on structured results.
    Schema(Value),
    /// Free-form description, documentation only.
    Annotation(String),
}

impl ResultContract {
    fn describe(&self) -> Value {
        match self {
            ResultContract::Schema(schema) => schema.clone(),
            ResultContract::Annotation(text) => Value::String(text.clone()),
        }
    }
}

/// Everything the registry knows about one tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: ParamContract,
    pub result: ResultContract,
    pub serialization: SerializationMode,
    handler: ToolHandler,
}

impl ToolDescriptor {
    pub fn new<F, Fut>(name: &str, description: &str, parameters: ParamContract, handler: F) -> Self
    where
        F: Fn(BackendClient, ToolParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolEnvelope>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            result: ResultContract::Annotation("object".to_string()),
            serialization: SerializationMode::Structured,
            handler: Arc::new(move |client: BackendClient, params: ToolParams| -> ToolFuture {
                handler(client, params).boxed()
            }),
        }
    }

    pub fn with_result(mut self, result: ResultContract) -> Self {
        self.result = result;
        self
    }

    pub fn with_serialization(mut self, mode: SerializationMode) -> Self {
        self.serialization = mode;
        self
    }

    /// Introspection record for this tool.
    pub fn describe(&self) -> ToolDescription {
        ToolDescription {
            description: self.description.clone(),
            signature: self.parameters.signature(&self.name),
            parameters: self.parameters.describe(),
            result: self.result.describe(),
            serialization: self.serialization,
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.parameters.name)
            .field("result", &self.result)
            .field("serialization", &self.serialization)
            .finish()
    }
}

/// Serializable view of a descriptor, as returned by `describe_all`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub description: String,
    pub signature: String,
    pub parameters: Value,
    pub result: Value,
    pub serialization: SerializationMode,
}

// =============================================================================
// Registry
// =============================================================================

struct RegisteredTool {
    descriptor: ToolDescriptor,
    result_validator: Option<jsonschema::Validator>,
}

/// Explicit, name-unique tool registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Fails fast on duplicate names, malformed contracts
    /// and result schemas that do not compile.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if descriptor.name.is_empty() {
            return Err(Error::config("tool name cannot be empty"));
        }
        if self.tools.contains_key(&descriptor.name) {
            return Err(Error::DuplicateTool(descriptor.name));
        }
        descriptor.parameters.check()?;

        let result_validator = match (&descriptor.result, descriptor.serialization) {
            (ResultContract::Schema(schema), SerializationMode::Structured) => {
                Some(jsonschema::validator_for(schema).map_err(|e| {
                    Error::config(format!("tool '{}': invalid result schema: {}", descriptor.name, e))
                })?)
            }
            _ => None,
        };

        tracing::debug!(tool = %descriptor.name, "registered tool");
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                result_validator,
            },
        );
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor> {
        self.tools
            .get(name)
            .map(|t| &t.descriptor)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Description of every registered tool, keyed by name.
    pub fn describe_all(&self) -> BTreeMap<String, ToolDescription> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.descriptor.describe()))
            .collect()
    }

    /// Validate, dispatch and normalize one tool call.
    pub async fn invoke(
        &self,
        name: &str,
        raw_params: &Value,
        client: &BackendClient,
    ) -> Result<ToolEnvelope> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        let invocation = InvocationId::new();
        let span = tracing::info_span!("tool", tool = %name, invocation = %invocation);

        async move {
            let params = match tool.descriptor.parameters.validate(raw_params) {
                Ok(params) => params,
                Err(err) => {
                    tracing::warn!(error = %err, "rejected tool parameters");
                    return Ok(ToolEnvelope::from_error(&err));
                }
            };

            let started = Instant::now();
            let handler = tool.descriptor.handler.clone();
            let client = client.clone();
            let outcome = AssertUnwindSafe(async move { handler(client, params).await })
                .catch_unwind()
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let envelope = match outcome {
                Ok(Ok(envelope)) => tool.normalize(envelope),
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, code = err.error_code(), elapsed_ms, "tool failed");
                    failure_envelope(&err)
                }
                Err(panic) => {
                    tracing::error!(panic = %panic_message(&*panic), elapsed_ms, "tool implementation panicked");
                    ToolEnvelope::failure_with_code(
                        "INTERNAL",
                        "Internal error while executing tool",
                    )
                }
            };

            tracing::info!(success = envelope.success, elapsed_ms, "tool invocation finished");
            Ok(envelope)
        }
        .instrument(span)
        .await
    }
}

impl RegisteredTool {
    fn normalize(&self, envelope: ToolEnvelope) -> ToolEnvelope {
        if self.descriptor.serialization == SerializationMode::Raw || !envelope.success {
            return envelope;
        }
        let Some(data) = &envelope.data else {
            return envelope;
        };
        if !data.is_object() {
            tracing::error!("structured tool returned non-object data");
            return ToolEnvelope::failure_with_code(
                "RESULT_CONTRACT_VIOLATION",
                "Tool returned a result that is not a JSON object",
            );
        }
        if let Some(validator) = &self.result_validator {
            let violations: Vec<String> = validator
                .iter_errors(data)
                .take(3)
                .map(|e| e.to_string())
                .collect();
            if !violations.is_empty() {
                tracing::error!(violations = ?violations, "tool result violates its contract");
                return ToolEnvelope::failure_with_code(
                    "RESULT_CONTRACT_VIOLATION",
                    format!("Tool result violates its contract: {}", violations.join("; ")),
                );
            }
        }
        envelope
    }
}

/// Envelope for errors raised by an implementation. Internal faults get a
/// generic message; backend and auth failures keep their detail so callers
/// can tell "unreachable" from "rejected".
fn failure_envelope(err: &Error) -> ToolEnvelope {
    match err {
        Error::Internal(_) | Error::Io(_) | Error::Serialization(_) | Error::Yaml(_) => {
            ToolEnvelope::failure_with_code(err.error_code(), "Internal error while executing tool")
        }
        _ => ToolEnvelope::from_error(err),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
