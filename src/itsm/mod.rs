//! Built-in ITSM tools backed by the table REST API.
//!
//! - **incidents**: incident lookup and listing (`incident` table)
//! - **knowledge**: knowledge-base categories (`kb_category` table)

pub mod incidents;
pub mod knowledge;

use serde_json::{Map, Value};

use crate::tools::ToolRegistry;
use crate::types::{Error, Result};

/// Upper bound for `limit` on list tools.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Register every built-in tool.
pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<()> {
    incidents::register(registry)?;
    knowledge::register(registry)?;
    Ok(())
}

/// Build a registry holding only the built-in tools.
pub fn builtin_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry)?;
    Ok(registry)
}

// =============================================================================
// Record helpers
// =============================================================================

/// Display form of a record field.
///
/// Reference fields come back as `{"display_value": .., "value": ..}` when
/// `sysparm_display_value=all`; plain fields are strings. Missing and empty
/// reference fields render as null.
pub(crate) fn display(record: &Value, field: &str) -> Value {
    match record.get(field) {
        Some(Value::Object(reference)) => match reference.get("display_value") {
            Some(Value::String(s)) if !s.is_empty() => Value::String(s.clone()),
            Some(Value::String(_)) | None | Some(Value::Null) => Value::Null,
            Some(other) => other.clone(),
        },
        Some(Value::Null) | None => Value::Null,
        Some(other) => other.clone(),
    }
}

/// Project `record` onto `(output_key, source_field)` pairs.
pub(crate) fn project(record: &Value, fields: &[(&str, &str)]) -> Value {
    let mut out = Map::new();
    for (key, source) in fields {
        out.insert((*key).to_string(), display(record, source));
    }
    Value::Object(out)
}

/// Join encoded-query clauses with `^`, skipping empty ones.
pub(crate) fn encoded_query<I, S>(clauses: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = clauses
        .into_iter()
        .filter(|c| !c.as_ref().is_empty())
        .map(|c| c.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("^");
    (!joined.is_empty()).then_some(joined)
}

/// The table API returns a list under `result` for queries.
pub(crate) fn records(result: Value) -> Result<Vec<Value>> {
    match result {
        Value::Array(items) => Ok(items),
        other => Err(Error::internal(format!(
            "expected a record list from the table API, got {}",
            match other {
                Value::Object(_) => "an object",
                Value::Null => "null",
                _ => "a scalar",
            }
        ))),
    }
}

/// Validate paging parameters, returning a user-facing message on failure.
pub(crate) fn check_paging(limit: i64, offset: i64) -> std::result::Result<(), String> {
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(format!("limit must be between 1 and {}, got {}", MAX_PAGE_SIZE, limit));
    }
    if offset < 0 {
        return Err(format!("offset cannot be negative, got {}", offset));
    }
    Ok(())
}
