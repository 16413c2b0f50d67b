use crate::batch::{BatchItemResult, BatchResult, BatchSummary};
use crate::error::ApiError;
use crate::http::RateMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Shared input for list tools.
#[derive(Debug, Deserialize)]
pub struct ListInput {
    pub filter: Option<String>,
    pub cursor: Option<String>,
    pub size: Option<u32>,
    pub fields: Option<Vec<String>>,
    pub include_rate: Option<bool>,
}

/// Shared input for get tools.
#[derive(Debug, Deserialize)]
pub struct GetInput {
    pub id: i64,
    pub fields: Option<Vec<String>>,
    pub include_rate: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PingInput {
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PingOutput {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    pub retriable: bool,
}

impl From<&ApiError> for ErrorShape {
    fn from(err: &ApiError) -> Self {
        ErrorShape {
            code: err.code().to_string(),
            message: err.message(),
            retriable: err.retriable(),
        }
    }
}

#[derive(Debug, Serialize, Default)]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<RateMeta>,
}

#[derive(Debug, Serialize)]
pub struct ListOutput {
    pub items: Option<Vec<Value>>,
    pub meta: Meta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

#[derive(Debug, Serialize)]
pub struct ItemOutput {
    pub item: Option<Value>,
    pub meta: Meta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

/// Envelope for batch-shaped mutation calls: the aggregate result plus
/// per-item records in original input order.
#[derive(Debug, Serialize)]
pub struct BatchOutput {
    pub success: bool,
    pub results: Vec<BatchItemResult<Value>>,
    pub summary: BatchSummary,
}

impl From<BatchResult<Value>> for BatchOutput {
    fn from(r: BatchResult<Value>) -> Self {
        BatchOutput {
            success: r.success,
            results: r.results,
            summary: r.summary,
        }
    }
}

fn list_schema(what: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "filter": {"type": "string", "description": "Filter expression, e.g. name ~ prod && port > 80"},
            "cursor": {"type": "string"},
            "size": {"type": "integer", "minimum": 1, "maximum": 1000},
            "fields": {"type": "array", "items": {"type": "string"}, "description": format!("Project each {} to these fields", what)},
            "include_rate": {"type": "boolean"}
        }
    })
}

fn get_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "id": {"type": "integer"},
            "fields": {"type": "array", "items": {"type": "string"}},
            "include_rate": {"type": "boolean"}
        },
        "required": ["id"]
    })
}

fn batch_options_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "max_concurrent": {"type": "integer", "minimum": 1},
            "continue_on_error": {"type": "boolean"},
            "retry_on_rate_limit": {"type": "boolean"},
            "retry": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "max_retries": {"type": "integer", "minimum": 1},
                    "initial_delay_ms": {"type": "integer"},
                    "max_delay_ms": {"type": "integer"},
                    "backoff_multiplier": {"type": "number"}
                }
            }
        }
    })
}

fn mutation_schema(item: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "oneOf": [
            item,
            {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "items": {"type": "array", "items": item},
                    "options": batch_options_schema()
                },
                "required": ["items"]
            }
        ]
    })
}

fn object_item() -> serde_json::Value {
    serde_json::json!({"type": "object"})
}

fn id_item() -> serde_json::Value {
    serde_json::json!({
        "oneOf": [
            {"type": "integer"},
            {"type": "object", "properties": {"id": {"type": "integer"}}, "required": ["id"]}
        ]
    })
}

pub fn tool_descriptors() -> Vec<ToolDescriptor> {
    let mut tools = vec![ToolDescriptor {
        name: "ping".into(),
        description: "Health check; echoes a message.".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "message": {"type": "string"}
            }
        }),
    }];

    for (singular, plural) in [
        ("device", "devices"),
        ("device group", "device_groups"),
        ("website", "websites"),
    ] {
        tools.push(ToolDescriptor {
            name: format!("list_{plural}"),
            description: format!("List {singular}s with filter and pagination"),
            input_schema: list_schema(singular),
        });
        tools.push(ToolDescriptor {
            name: format!("get_{}", plural.trim_end_matches('s')),
            description: format!("Get a single {singular} by id"),
            input_schema: get_schema(),
        });
        tools.push(ToolDescriptor {
            name: format!("create_{plural}"),
            description: format!("Create one {singular} or a batch of {singular}s"),
            input_schema: mutation_schema(object_item()),
        });
        tools.push(ToolDescriptor {
            name: format!("update_{plural}"),
            description: format!("Update one {singular} or a batch (each item carries its id)"),
            input_schema: mutation_schema(serde_json::json!({
                "type": "object",
                "properties": {"id": {"type": "integer"}},
                "required": ["id"]
            })),
        });
        tools.push(ToolDescriptor {
            name: format!("delete_{plural}"),
            description: format!("Delete one {singular} or a batch, by id"),
            input_schema: mutation_schema(id_item()),
        });
    }

    tools.push(ToolDescriptor {
        name: "list_alerts".into(),
        description: "List alerts with filter and pagination".into(),
        input_schema: list_schema("alert"),
    });
    tools.push(ToolDescriptor {
        name: "get_alert".into(),
        description: "Get a single alert by id".into(),
        input_schema: get_schema(),
    });
    tools.push(ToolDescriptor {
        name: "ack_alerts".into(),
        description: "Acknowledge one alert or a batch of alerts".into(),
        input_schema: mutation_schema(serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "id": {"type": "integer"},
                "note": {"type": "string"}
            },
            "required": ["id"]
        })),
    });

    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_catalog_covers_all_resources() {
        let tools = tool_descriptors();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        for expected in [
            "ping",
            "list_devices",
            "get_device",
            "create_devices",
            "update_devices",
            "delete_devices",
            "list_device_groups",
            "get_device_group",
            "create_device_groups",
            "update_device_groups",
            "delete_device_groups",
            "list_websites",
            "get_website",
            "create_websites",
            "update_websites",
            "delete_websites",
            "list_alerts",
            "get_alert",
            "ack_alerts",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
        assert_eq!(names.len(), 19);
    }

    #[test]
    fn error_shape_carries_code_and_retriability() {
        let e = ApiError::Status {
            code: "not_found".into(),
            message: "no such device".into(),
        };
        let shape = ErrorShape::from(&e);
        assert_eq!(shape.code, "not_found");
        assert!(!shape.retriable);
    }
}
