//! Tool descriptors, input schemas and `tools/call` payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::content::Content;

/// What `tools/list` advertises for one registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: ToolSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
}

impl Tool {
    /// A tool that takes no arguments until [`Tool::with_input_schema`] says otherwise.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Tool {
            name: name.into(),
            title: None,
            description: Some(description.into()),
            input_schema: ToolSchema::empty(),
            annotations: None,
        }
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        Tool {
            title: Some(title.into()),
            ..self
        }
    }

    pub fn with_input_schema(self, input_schema: ToolSchema) -> Self {
        Tool {
            input_schema,
            ..self
        }
    }

    /// Hint that calling the tool leaves server state untouched.
    pub fn read_only(self) -> Self {
        self.annotate(|hints| hints.read_only_hint = Some(true))
    }

    /// Hint that repeating a call with the same arguments changes nothing further.
    pub fn idempotent(self) -> Self {
        self.annotate(|hints| hints.idempotent_hint = Some(true))
    }

    fn annotate(mut self, set: impl FnOnce(&mut ToolAnnotations)) -> Self {
        set(self.annotations.get_or_insert_with(ToolAnnotations::default));
        self
    }
}

/// Behavioral hints. Clients treat every field as advisory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
}

/// The object-shaped JSON Schema MCP requires for `inputSchema`.
///
/// Only `type`, `properties` and `required` survive; anything else a schema
/// generator emits (titles, `$schema`, definitions) is dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl ToolSchema {
    pub fn empty() -> Self {
        ToolSchema {
            schema_type: "object".into(),
            properties: None,
            required: None,
        }
    }

    /// Pick the object keywords out of an arbitrary schema document.
    /// Non-object input yields [`ToolSchema::empty`].
    pub fn from_value(value: Value) -> Self {
        let mut doc = match value {
            Value::Object(doc) => doc,
            _ => return Self::empty(),
        };

        let schema_type = match doc.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => "object".into(),
        };
        let properties = match doc.remove("properties") {
            Some(Value::Object(props)) => Some(props),
            _ => None,
        };
        let required = match doc.remove("required") {
            Some(Value::Array(names)) => Some(
                names
                    .into_iter()
                    .filter_map(|name| match name {
                        Value::String(name) => Some(name),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        };

        ToolSchema {
            schema_type,
            properties,
            required,
        }
    }
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self::empty()
    }
}

/// Build an input schema from an argument struct deriving `JsonSchema`.
///
/// Nested types are inlined, so the result carries no `$ref`.
pub fn schema_for<T: schemars::JsonSchema>() -> ToolSchema {
    let generator = schemars::generate::SchemaSettings::draft07()
        .with(|settings| settings.inline_subschemas = true)
        .into_generator();
    let root = generator.into_root_schema_for::<T>();

    serde_json::to_value(root)
        .map(ToolSchema::from_value)
        .unwrap_or_default()
}

/// `tools/call` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

/// What a tool hands back. A failed tool is still a successful JSON-RPC
/// response, flagged with `isError`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    pub fn success(content: Vec<Content>) -> Self {
        CallToolResult {
            content,
            is_error: false,
            structured_content: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::success(vec![Content::text(text)])
    }

    pub fn error(message: impl Into<String>) -> Self {
        CallToolResult {
            is_error: true,
            ..Self::text(message)
        }
    }
}

/// `tools/list` result. The registry is small, so there is never a next page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

impl ListToolsResult {
    pub fn all(tools: Vec<Tool>) -> Self {
        ListToolsResult { tools }
    }
}
