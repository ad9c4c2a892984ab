use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of the lightweight single-table read tool.
pub const READ_DATA_RECORD: &str = "read_data_record";
/// Identifier of the general-purpose query tool (filters, sorting, aggregates, joins).
pub const ANY_QUERY: &str = "any_query";
/// Identifier of the UI rendering tool (charts, tables, cards).
pub const RENDER_COMPONENT: &str = "render_component";
/// Identifier of the UI navigation tool.
pub const NAVIGATE_TO_PAGE: &str = "navigate_to_page";

/// Description of a tool that can be offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Unique name, e.g. "any_query", "navigate_to_page".
    pub name: String,
    /// Human-readable description for the model.
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
    /// Whether this tool has side-effects (write vs read).
    #[serde(default)]
    pub is_mutating: bool,
}

/// A request from the model to call a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// The built-in catalog of tools the selector may offer.
pub fn builtin_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: READ_DATA_RECORD.into(),
            description: "Read records of one business entity (students, classes, teachers, ...) \
                          without conditions. Cheapest way to list data."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "entity": { "type": "string", "description": "Entity name, e.g. students" },
                    "page": { "type": "integer", "minimum": 1 },
                    "page_size": { "type": "integer", "minimum": 1, "maximum": 100 }
                },
                "required": ["entity"]
            }),
            is_mutating: false,
        },
        Tool {
            name: ANY_QUERY.into(),
            description: "Answer a data question that needs filtering, sorting, statistics or \
                          joining several entities. Describe the question in natural language."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The data question" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 500 }
                },
                "required": ["query"]
            }),
            is_mutating: false,
        },
        Tool {
            name: RENDER_COMPONENT.into(),
            description: "Render a visual component (chart, table, statistic card) in the user's \
                          workspace."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "component": { "type": "string", "enum": ["chart", "table", "stat_card", "list"] },
                    "title": { "type": "string" },
                    "data_query": { "type": "string", "description": "Data the component shows" }
                },
                "required": ["component"]
            }),
            is_mutating: false,
        },
        Tool {
            name: NAVIGATE_TO_PAGE.into(),
            description: "Take the user to a page of the management console.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "page": { "type": "string", "description": "Target page, e.g. student management" }
                },
                "required": ["page"]
            }),
            is_mutating: false,
        },
    ]
}
