//! Synthesizes an OpenAPI 3.1 document from registered tool schemas, served
//! at `GET /openapi.json`. Each tool becomes one `POST /tools/{name}`
//! operation whose request body is the tool's cached `inputSchema`.

use serde_json::{json, Value};

use crate::config::ServerIdentity;
use crate::registry::HandlerRegistry;

pub fn synthesize(registry: &HandlerRegistry, identity: &ServerIdentity) -> Value {
    let mut paths = serde_json::Map::new();
    for name in registry.tool_names() {
        let (tools, _) = registry.list_tools(None, None);
        // tool_names() and list_tools() share ordering; look the descriptor
        // up by decoding its cached bytes rather than re-deriving the schema.
        let descriptor = tools
            .iter()
            .find_map(|bytes| {
                let value: Value = serde_json::from_slice(bytes).ok()?;
                if value.get("name").and_then(Value::as_str) == Some(name.as_str()) {
                    Some(value)
                } else {
                    None
                }
            })
            .unwrap_or(json!({}));

        let input_schema = descriptor.get("inputSchema").cloned().unwrap_or(json!({"type": "object"}));
        let description = descriptor.get("description").cloned().unwrap_or(Value::Null);

        paths.insert(
            format!("/tools/{name}"),
            json!({
                "post": {
                    "operationId": name,
                    "summary": description,
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": { "schema": input_schema }
                        }
                    },
                    "responses": {
                        "200": {
                            "description": "Tool call result",
                            "content": {
                                "application/json": { "schema": { "type": "object" } }
                            }
                        }
                    }
                }
            }),
        );
    }

    json!({
        "openapi": "3.1.0",
        "info": {
            "title": identity.title.clone().unwrap_or_else(|| identity.name.clone()),
            "version": identity.version,
            "description": identity.description,
        },
        "paths": Value::Object(paths),
    })
}
