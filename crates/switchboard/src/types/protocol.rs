//! The `initialize` handshake and protocol version negotiation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Accepted `protocolVersion` / `mcp-protocol-version` values. The first
/// entry is what the server prefers.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 4] =
    ["2025-06-18", "2025-03-26", "2024-11-05", "2024-10-07"];

pub const LATEST_PROTOCOL_VERSION: &str = SUPPORTED_PROTOCOL_VERSIONS[0];

pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Echo the client's version if we speak it, else offer our latest and let
/// the client decide whether to carry on.
pub fn negotiate_version(requested: Option<&str>) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .into_iter()
        .find(|supported| Some(*supported) == requested)
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// `serverInfo` / `clientInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Implementation {
            name: name.into(),
            version: version.into(),
            title: None,
        }
    }
}

/// Every member may be missing on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeParams {
    pub protocol_version: Option<String>,
    /// Opaque; the server never offers anything that depends on it.
    pub capabilities: Value,
    pub client_info: Option<Implementation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl InitializeResult {
    pub fn new(server_info: Implementation, capabilities: ServerCapabilities) -> Self {
        InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.into(),
            capabilities,
            server_info,
            instructions: None,
        }
    }

    pub fn with_protocol_version(self, version: impl Into<String>) -> Self {
        InitializeResult {
            protocol_version: version.into(),
            ..self
        }
    }

    pub fn with_instructions(self, instructions: impl Into<String>) -> Self {
        InitializeResult {
            instructions: Some(instructions.into()),
            ..self
        }
    }
}

/// Capabilities advertised in the handshake. An absent member means the
/// feature is off; a present one (even `{}`) means it is on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<Value>,
}

impl ServerCapabilities {
    pub fn enable_tools(self) -> Self {
        ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            ..self
        }
    }

    pub fn enable_logging(self) -> Self {
        ServerCapabilities {
            logging: Some(Value::Object(Default::default())),
            ..self
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// Tools are fixed at startup, so this stays unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}
