//! Parameter contracts: typed field descriptors, validation/coercion, schema export.
//!
//! A [`ParamContract`] is an explicit list of [`ParamDef`]s built once at
//! registration time. Validation turns an untyped JSON payload into
//! [`ToolParams`]; `describe()` renders the same descriptor list as JSON Schema
//! without ever touching a tool implementation.

use crate::types::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use std::collections::HashSet;

// =============================================================================
// Parameter types
// =============================================================================

/// Semantic type of a tool parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    StringList,
    Enum(Vec<String>),
    Object,
    Optional(Box<ParamType>),
}

impl ParamType {
    /// Coerce a raw JSON value into this type.
    ///
    /// Compatible values are converted (numbers into identifier strings,
    /// numeric strings into numbers, "true"/"false" into booleans);
    /// structurally incompatible values fail with `TypeMismatch`.
    pub fn coerce(&self, field: &str, value: &Value) -> Result<Value> {
        let mismatch = || Error::type_mismatch(field, self.display_name(), value_type_name(value));

        match self {
            ParamType::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                _ => Err(mismatch()),
            },
            ParamType::Int => match value {
                Value::Number(n) if n.is_i64() => Ok(value.clone()),
                // Above i64::MAX.
                Value::Number(n) if n.is_u64() => Err(mismatch()),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Value::from(f as i64))
                    }
                    _ => Err(mismatch()),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            ParamType::Float => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            ParamType::Bool => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            ParamType::StringList => {
                let items = value.as_array().ok_or_else(mismatch)?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| ParamType::String.coerce(&format!("{}[{}]", field, i), item))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            ParamType::Enum(variants) => {
                let candidate = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return Err(mismatch()),
                };
                if variants.iter().any(|v| *v == candidate) {
                    Ok(Value::String(candidate))
                } else {
                    Err(Error::type_mismatch(
                        field,
                        format!("one of: {}", variants.join(", ")),
                        format!("'{}'", candidate),
                    ))
                }
            }
            ParamType::Object => match value {
                Value::Object(_) => Ok(value.clone()),
                _ => Err(mismatch()),
            },
            ParamType::Optional(inner) => {
                if value.is_null() {
                    Ok(Value::Null)
                } else {
                    inner.coerce(field, value)
                }
            }
        }
    }

    /// Human-readable type name for signatures and error messages.
    pub fn display_name(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Int => "integer".to_string(),
            ParamType::Float => "number".to_string(),
            ParamType::Bool => "boolean".to_string(),
            ParamType::StringList => "string[]".to_string(),
            ParamType::Enum(variants) => format!("enum({})", variants.join("|")),
            ParamType::Object => "object".to_string(),
            ParamType::Optional(inner) => format!("{}?", inner.display_name()),
        }
    }

    /// JSON Schema fragment for this type.
    pub fn json_schema(&self) -> Value {
        match self {
            ParamType::String => json!({"type": "string"}),
            ParamType::Int => json!({"type": "integer"}),
            ParamType::Float => json!({"type": "number"}),
            ParamType::Bool => json!({"type": "boolean"}),
            ParamType::StringList => json!({"type": "array", "items": {"type": "string"}}),
            ParamType::Enum(variants) => json!({"type": "string", "enum": variants}),
            ParamType::Object => json!({"type": "object"}),
            ParamType::Optional(inner) => json!({"anyOf": [inner.json_schema(), {"type": "null"}]}),
        }
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Parameter definition
// =============================================================================

/// A single field of a parameter contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamDef {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            optional: false,
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            optional: true,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.optional = true;
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        !self.optional
            && self.default.is_none()
            && !matches!(self.param_type, ParamType::Optional(_))
    }
}

// =============================================================================
// Parameter contract
// =============================================================================

/// Named, ordered set of parameter fields for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamContract {
    pub name: String,
    pub fields: Vec<ParamDef>,
}

impl ParamContract {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, def: ParamDef) -> Self {
        self.fields.push(def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Registration-time sanity check: unique field names, defaults that
    /// satisfy their own declared type.
    pub fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for def in &self.fields {
            if def.name.is_empty() {
                return Err(Error::config(format!("contract '{}' has an unnamed field", self.name)));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(Error::config(format!(
                    "contract '{}' declares field '{}' twice",
                    self.name, def.name
                )));
            }
            if let Some(default) = &def.default {
                def.param_type.coerce(&def.name, default).map_err(|e| {
                    Error::config(format!("contract '{}': bad default: {}", self.name, e))
                })?;
            }
        }
        Ok(())
    }

    /// Validate and coerce a raw payload.
    ///
    /// Fields are checked in declaration order, so the first missing required
    /// field is the one reported. Unknown keys are dropped.
    pub fn validate(&self, raw: &Value) -> Result<ToolParams> {
        let empty = Map::new();
        let input = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(Error::type_mismatch("<payload>", "object", value_type_name(other)))
            }
        };

        let mut values = Map::new();
        for def in &self.fields {
            let provided = input.get(&def.name);
            match provided {
                Some(value) if !value.is_null() || matches!(def.param_type, ParamType::Optional(_)) => {
                    values.insert(def.name.clone(), def.param_type.coerce(&def.name, value)?);
                }
                _ if def.is_required() => return Err(Error::missing_field(&def.name)),
                _ => {
                    if let Some(default) = &def.default {
                        values.insert(def.name.clone(), def.param_type.coerce(&def.name, default)?);
                    }
                }
            }
        }

        for key in input.keys() {
            if self.get(key).is_none() {
                tracing::debug!(contract = %self.name, field = %key, "ignoring unknown parameter");
            }
        }

        Ok(ToolParams { values })
    }

    /// Declarative JSON Schema for this contract.
    pub fn describe(&self) -> Value {
        let mut properties = Map::new();
        for def in &self.fields {
            let mut prop = def.param_type.json_schema();
            if let Some(obj) = prop.as_object_mut() {
                obj.insert("description".to_string(), Value::String(def.description.clone()));
                if let Some(default) = &def.default {
                    obj.insert("default".to_string(), default.clone());
                }
            }
            properties.insert(def.name.clone(), prop);
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.is_required())
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "title": self.name,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// One-line signature, e.g. `get_incident_by_number(incident_number: string)`.
    pub fn signature(&self, tool_name: &str) -> String {
        let params: Vec<String> = self
            .fields
            .iter()
            .map(|p| {
                let optional = if p.is_required() { "" } else { "?" };
                format!("{}{}: {}", p.name, optional, p.param_type.display_name())
            })
            .collect();
        format!("{}({})", tool_name, params.join(", "))
    }
}

// =============================================================================
// Validated parameters
// =============================================================================

/// Validated, coerced parameters handed to a tool implementation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolParams {
    values: Map<String, Value>,
}

impl ToolParams {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// Required string field. Validation guarantees presence for required fields.
    pub fn str(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::missing_field(name))
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn opt_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn opt_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Deserialize into a typed parameter struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.values.clone()))?)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }
}

// =============================================================================
// Tests
// =============================================================================
