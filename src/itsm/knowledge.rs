//! Knowledge-base category tools.
//!
//! Categories live in `kb_category`. A top-level category is parented by its
//! knowledge base (`parent_table = kb_knowledge_base`); a nested one by
//! another category.

use serde_json::{json, Value};

use super::{check_paging, display, encoded_query, records};
use crate::backend::BackendClient;
use crate::tools::{
    ParamContract, ParamDef, ParamType, ResultContract, ToolDescriptor, ToolEnvelope, ToolParams,
    ToolRegistry,
};
use crate::types::{Error, Result};

const TABLE: &str = "kb_category";

pub fn register(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(
        ToolDescriptor::new(
            "create_category",
            "Create a category in a knowledge base.",
            ParamContract::new("CreateCategoryParams")
                .field(ParamDef::required("title", ParamType::String, "Title of the category"))
                .field(ParamDef::required(
                    "knowledge_base",
                    ParamType::String,
                    "sys_id of the knowledge base the category belongs to",
                ))
                .field(ParamDef::optional(
                    "description",
                    ParamType::String,
                    "Description of the category",
                ))
                .field(ParamDef::optional(
                    "parent_category",
                    ParamType::String,
                    "sys_id of the parent category, for nested categories",
                ))
                .field(
                    ParamDef::optional("active", ParamType::Bool, "Whether the category is active")
                        .with_default(json!(true)),
                ),
            create_category,
        )
        .with_result(ResultContract::Schema(json!({
            "type": "object",
            "properties": {"category": {"type": "object", "required": ["sys_id"]}},
            "required": ["category"],
        }))),
    )?;

    registry.register(
        ToolDescriptor::new(
            "list_categories",
            "List knowledge-base categories.",
            ParamContract::new("ListCategoriesParams")
                .field(ParamDef::optional(
                    "knowledge_base",
                    ParamType::String,
                    "Restrict to one knowledge base (sys_id)",
                ))
                .field(ParamDef::optional("active", ParamType::Bool, "Filter by active flag"))
                .field(ParamDef::optional(
                    "query",
                    ParamType::String,
                    "Text to search for in category labels",
                ))
                .field(
                    ParamDef::optional("limit", ParamType::Int, "Maximum number of categories to return")
                        .with_default(json!(10)),
                )
                .field(
                    ParamDef::optional("offset", ParamType::Int, "Offset for pagination")
                        .with_default(json!(0)),
                ),
            list_categories,
        )
        .with_result(ResultContract::Annotation(
            "{categories: [{sys_id, label, description, knowledge_base, parent, parent_table, active}], count}"
                .to_string(),
        )),
    )?;

    Ok(())
}

fn flatten_category(record: &Value) -> Value {
    json!({
        "sys_id": display(record, "sys_id"),
        "label": display(record, "label"),
        "description": display(record, "description"),
        "knowledge_base": display(record, "kb_knowledge_base"),
        "parent": display(record, "parent_id"),
        "parent_table": display(record, "parent_table"),
        "active": parse_flag(&display(record, "active")),
        "created_on": display(record, "sys_created_on"),
        "updated_on": display(record, "sys_updated_on"),
    })
}

/// Table API booleans are the strings `"true"`/`"false"`.
fn parse_flag(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::Bool(s.eq_ignore_ascii_case("true")),
        Value::Bool(_) => value.clone(),
        _ => Value::Null,
    }
}

pub async fn create_category(client: BackendClient, params: ToolParams) -> Result<ToolEnvelope> {
    let title = params.str("title")?;
    let knowledge_base = params.str("knowledge_base")?;
    let active = params.opt_bool("active").unwrap_or(true);

    let (parent_id, parent_table) = match params.opt_str("parent_category") {
        Some(parent) => (parent, "kb_category"),
        None => (knowledge_base, "kb_knowledge_base"),
    };

    let mut body = json!({
        "label": title,
        "kb_knowledge_base": knowledge_base,
        "parent_id": parent_id,
        "parent_table": parent_table,
        "active": active.to_string(),
    });
    if let Some(description) = params.opt_str("description") {
        body["description"] = json!(description);
    }

    let created = client.post_table(TABLE, &body).await?;
    if !created.is_object() {
        return Err(Error::internal("category creation returned no record"));
    }
    let category = flatten_category(&created);
    tracing::info!(sys_id = %category["sys_id"], "created knowledge category");

    Ok(ToolEnvelope::success(
        format!("Category '{}' created", title),
        json!({ "category": category }),
    ))
}

pub async fn list_categories(client: BackendClient, params: ToolParams) -> Result<ToolEnvelope> {
    let limit = params.opt_i64("limit").unwrap_or(10);
    let offset = params.opt_i64("offset").unwrap_or(0);
    if let Err(message) = check_paging(limit, offset) {
        return Ok(ToolEnvelope::failure(message));
    }

    let clauses = [
        params.opt_str("knowledge_base").map(|kb| format!("kb_knowledge_base={}", kb)),
        params.opt_bool("active").map(|a| format!("active={}", a)),
        params.opt_str("query").map(|q| format!("labelLIKE{}", q)),
    ];
    let mut query = vec![
        ("sysparm_limit", limit.to_string()),
        ("sysparm_offset", offset.to_string()),
        ("sysparm_display_value", "all".to_string()),
    ];
    if let Some(encoded) = encoded_query(clauses.into_iter().flatten()) {
        query.push(("sysparm_query", encoded));
    }

    let categories: Vec<Value> = records(client.get_table(TABLE, &query).await?)?
        .iter()
        .map(flatten_category)
        .collect();
    let count = categories.len();

    Ok(ToolEnvelope::success(
        format!("Found {} categories", count),
        json!({ "categories": categories, "count": count }),
    ))
}
