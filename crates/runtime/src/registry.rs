//! Tool registry: routes tool names to the MCP client that serves them.
//!
//! Registration is last-write-wins when two servers export the same tool
//! name. Schemas are repaired defensively before being exposed to providers,
//! and heterogeneous result content is normalized into a single text blob.

use crate::llm::ToolSpec;
use crate::mcp::{McpClient, McpError};
use crate::{Error, Result};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// The boundary between the dispatch loop and tool side effects.
pub trait ToolHost: Send + Sync {
    /// Tool specifications to expose to the model.
    fn specs(&self) -> &[ToolSpec];

    /// Execute a tool call, returning the result as normalized text.
    fn execute(
        &self,
        name: &str,
        arguments: &Value,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Tool host backed by one or more MCP servers.
#[derive(Default)]
pub struct ToolRegistry {
    routes: HashMap<String, Arc<McpClient>>,
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tool exported by a connected server. Returns how many
    /// tools the server contributed.
    pub async fn register_server(&mut self, client: McpClient) -> std::result::Result<usize, McpError> {
        let tools = client.list_tools().await?;
        let client = Arc::new(client);
        let count = tools.len();

        for tool in tools {
            let name = tool.name.to_string();
            let spec = ToolSpec {
                name: name.clone(),
                description: tool
                    .description
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                parameters: repair_schema(Value::Object((*tool.input_schema).clone())),
            };

            if self.routes.contains_key(&name) {
                warn!(tool = %name, "duplicate tool name, later server wins");
                self.specs.retain(|s| s.name != name);
            }
            self.specs.push(spec);
            self.routes.insert(name.clone(), Arc::clone(&client));
            debug!(tool = %name, "registered tool");
        }

        Ok(count)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Names of every registered tool, for the prompt builder.
    pub fn tool_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }
}

impl ToolHost for ToolRegistry {
    fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    async fn execute(&self, name: &str, arguments: &Value) -> Result<String> {
        let client = self
            .routes
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        let result = client
            .call_tool(name, arguments.as_object().cloned())
            .await
            .map_err(|e| Error::Tool(e.to_string()))?;

        let blocks = serde_json::to_value(&result.content)
            .map_err(|e| Error::Tool(format!("serialize result: {e}")))?;
        Ok(normalize_content(&blocks))
    }
}

/// Repair a malformed JSON schema so providers accept it.
///
/// Any node typed `array` without an item declaration gets a default
/// string-item type; the repair recurses through `anyOf`/`oneOf`/`allOf`,
/// `properties`, and `items`.
pub fn repair_schema(mut schema: Value) -> Value {
    fix_schema_node(&mut schema);
    schema
}

fn fix_schema_node(node: &mut Value) {
    match node {
        Value::Array(items) => {
            for item in items {
                fix_schema_node(item);
            }
        }
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("array")
                && !map.contains_key("items")
            {
                warn!("array schema missing items, defaulting to string items");
                map.insert("items".to_string(), json!({ "type": "string" }));
            }

            for key in ["anyOf", "oneOf", "allOf"] {
                if let Some(Value::Array(alternatives)) = map.get_mut(key) {
                    for alt in alternatives {
                        fix_schema_node(alt);
                    }
                }
            }
            if let Some(Value::Object(properties)) = map.get_mut("properties") {
                for (_, prop) in properties.iter_mut() {
                    fix_schema_node(prop);
                }
            }
            if let Some(items) = map.get_mut("items") {
                fix_schema_node(items);
            }
        }
        _ => {}
    }
}

/// Join heterogeneous MCP content blocks into one text blob.
///
/// Text blocks pass through; resource references and binary payloads become
/// placeholders; empty segments are skipped.
pub fn normalize_content(blocks: &Value) -> String {
    let Some(blocks) = blocks.as_array() else {
        return String::new();
    };

    blocks
        .iter()
        .filter_map(|block| {
            let kind = block.get("type").and_then(Value::as_str)?;
            let segment = match kind {
                "text" => block
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                "resource" => {
                    let uri = block
                        .pointer("/resource/uri")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown");
                    format!("[Resource: {uri}]")
                }
                "image" | "audio" => format!("[{kind} data received]"),
                _ => String::new(),
            };
            (!segment.is_empty()).then_some(segment)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_without_items_gets_string_items() {
        let repaired = repair_schema(json!({
            "type": "object",
            "properties": {
                "dates": { "type": "array" }
            }
        }));
        assert_eq!(
            repaired["properties"]["dates"]["items"],
            json!({ "type": "string" })
        );
    }

    #[test]
    fn repair_recurses_through_any_of_and_items() {
        let repaired = repair_schema(json!({
            "anyOf": [
                { "type": "array" },
                { "type": "array", "items": { "type": "array" } }
            ]
        }));
        assert_eq!(repaired["anyOf"][0]["items"], json!({ "type": "string" }));
        assert_eq!(
            repaired["anyOf"][1]["items"]["items"],
            json!({ "type": "string" })
        );
    }

    #[test]
    fn well_formed_schema_is_untouched() {
        let schema = json!({
            "type": "object",
            "properties": { "city": { "type": "string" } }
        });
        assert_eq!(repair_schema(schema.clone()), schema);
    }

    #[test]
    fn content_blocks_join_with_placeholders() {
        let blocks = json!([
            { "type": "text", "text": "first" },
            { "type": "text", "text": "" },
            { "type": "resource", "resource": { "uri": "file:///map.png" } },
            { "type": "image", "data": "..." },
            { "type": "text", "text": "last" }
        ]);
        assert_eq!(
            normalize_content(&blocks),
            "first\n\n[Resource: file:///map.png]\n\n[image data received]\n\nlast"
        );
    }

    #[test]
    fn empty_or_non_array_content_is_empty() {
        assert_eq!(normalize_content(&json!([])), "");
        assert_eq!(normalize_content(&json!(null)), "");
    }
}
