//! Incident tools.

use serde::Deserialize;
use serde_json::{json, Value};

use super::{check_paging, display, encoded_query, project, records};
use crate::backend::BackendClient;
use crate::tools::{
    ParamContract, ParamDef, ParamType, ResultContract, ToolDescriptor, ToolEnvelope, ToolParams,
    ToolRegistry,
};
use crate::types::Result;

const TABLE: &str = "incident";

/// Output key → incident table column.
const INCIDENT_FIELDS: &[(&str, &str)] = &[
    ("sys_id", "sys_id"),
    ("number", "number"),
    ("short_description", "short_description"),
    ("description", "description"),
    ("state", "state"),
    ("priority", "priority"),
    ("assigned_to", "assigned_to"),
    ("category", "category"),
    ("created_on", "sys_created_on"),
    ("updated_on", "sys_updated_on"),
];

pub fn register(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(
        ToolDescriptor::new(
            "get_incident_by_number",
            "Fetch a single incident by its number (e.g. INC0010001).",
            ParamContract::new("GetIncidentByNumberParams").field(ParamDef::required(
                "incident_number",
                ParamType::String,
                "The number of the incident to fetch",
            )),
            get_incident_by_number,
        )
        .with_result(ResultContract::Schema(incident_schema())),
    )?;

    registry.register(
        ToolDescriptor::new(
            "list_incidents",
            "List incidents, optionally filtered by state, assignee or an encoded query.",
            ParamContract::new("ListIncidentsParams")
                .field(
                    ParamDef::optional("limit", ParamType::Int, "Maximum number of incidents to return")
                        .with_default(json!(10)),
                )
                .field(
                    ParamDef::optional("offset", ParamType::Int, "Offset for pagination")
                        .with_default(json!(0)),
                )
                .field(ParamDef::optional("state", ParamType::String, "Filter by incident state"))
                .field(ParamDef::optional(
                    "assigned_to",
                    ParamType::String,
                    "Filter by assigned user (sys_id or user name)",
                ))
                .field(ParamDef::optional(
                    "query",
                    ParamType::String,
                    "Additional encoded query, e.g. priority=1^active=true",
                )),
            list_incidents,
        )
        .with_result(ResultContract::Schema(json!({
            "type": "object",
            "properties": {
                "incidents": {"type": "array", "items": incident_schema()},
                "count": {"type": "integer"},
            },
            "required": ["incidents", "count"],
        }))),
    )?;

    Ok(())
}

fn incident_schema() -> Value {
    let properties: serde_json::Map<String, Value> = INCIDENT_FIELDS
        .iter()
        .map(|(key, _)| ((*key).to_string(), json!({"type": ["string", "null"]})))
        .collect();
    json!({"type": "object", "properties": properties, "required": ["sys_id", "number"]})
}

/// Flatten a raw incident record into the tool's output shape.
pub fn flatten_incident(record: &Value) -> Value {
    project(record, INCIDENT_FIELDS)
}

/// Incident numbers are plain identifiers; anything else (notably `^`, the
/// encoded-query separator) would change the meaning of `number=<value>`.
fn is_valid_incident_number(number: &str) -> bool {
    !number.is_empty()
        && number
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub async fn get_incident_by_number(client: BackendClient, params: ToolParams) -> Result<ToolEnvelope> {
    let number = params.str("incident_number")?.trim().to_string();
    if !is_valid_incident_number(&number) {
        return Ok(ToolEnvelope::failure(format!("Invalid incident number: {}", number)));
    }
    let query = [
        ("sysparm_query", format!("number={}", number)),
        ("sysparm_limit", "1".to_string()),
        ("sysparm_display_value", "true".to_string()),
    ];

    let found = records(client.get_table(TABLE, &query).await?)?;
    let record = found.iter().find(|record| {
        display(record, "number")
            .as_str()
            .is_some_and(|n| n.eq_ignore_ascii_case(&number))
    });
    let Some(record) = record else {
        if !found.is_empty() {
            tracing::warn!(incident = %number, "backend returned a different incident");
        }
        tracing::info!(incident = %number, "incident not found");
        return Ok(ToolEnvelope::failure(format!("Incident not found: {}", number)));
    };

    Ok(ToolEnvelope::success(
        format!("Incident {} found", number),
        flatten_incident(record),
    ))
}

#[derive(Debug, Deserialize)]
struct ListIncidentsParams {
    limit: i64,
    offset: i64,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    assigned_to: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

pub async fn list_incidents(client: BackendClient, params: ToolParams) -> Result<ToolEnvelope> {
    let params: ListIncidentsParams = params.deserialize()?;
    if let Err(message) = check_paging(params.limit, params.offset) {
        return Ok(ToolEnvelope::failure(message));
    }

    let clauses = [
        params.state.map(|s| format!("state={}", s)),
        params.assigned_to.map(|a| format!("assigned_to={}", a)),
        params.query,
    ];
    let mut query = vec![
        ("sysparm_limit", params.limit.to_string()),
        ("sysparm_offset", params.offset.to_string()),
        ("sysparm_display_value", "true".to_string()),
    ];
    if let Some(encoded) = encoded_query(clauses.into_iter().flatten()) {
        query.push(("sysparm_query", encoded));
    }

    let incidents: Vec<Value> = records(client.get_table(TABLE, &query).await?)?
        .iter()
        .map(flatten_incident)
        .collect();
    let count = incidents.len();

    Ok(ToolEnvelope::success(
        format!("Found {} incidents", count),
        json!({ "incidents": incidents, "count": count }),
    ))
}
