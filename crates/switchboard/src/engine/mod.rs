//! The method dispatcher every session shares.
//!
//! The engine owns the tool registry and answers JSON-RPC methods.
//! Transports hand it messages; it reaches back to a client through the
//! transport the message arrived on. Each dispatch runs in a span carrying
//! the OpenTelemetry `rpc.*` attributes for JSON-RPC.

mod context;

pub use context::{Peer, ToolContext, ToolHandler};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::Instrument;

use crate::transport::StreamableTransport;
use crate::types::error::ErrorData;
use crate::types::jsonrpc::JsonRpcMessage;
use crate::types::logging::SetLevelParams;
use crate::types::protocol::{
    negotiate_version, Implementation, InitializeParams, InitializeResult, ServerCapabilities,
};
use crate::types::tool::{CallToolParams, ListToolsResult, Tool};

/// Errors from connecting transports to the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine has been closed.
    #[error("engine is closed")]
    Closed,

    /// The transport is already connected.
    #[error("transport is already connected to an engine")]
    AlreadyConnected,
}

struct RegisteredTool {
    tool: Tool,
    handler: Arc<dyn ToolHandler>,
}

/// Shared protocol engine.
pub struct Engine {
    info: Implementation,
    instructions: Option<String>,
    tools: Vec<RegisteredTool>,
    connections: Mutex<Vec<Weak<StreamableTransport>>>,
    closed: AtomicBool,
}

impl Engine {
    /// Create an engine with no tools.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation::new(name, version),
            instructions: None,
            tools: Vec::new(),
            connections: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Instructions returned in the initialize result.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn tool<H: ToolHandler>(mut self, tool: Tool, handler: H) -> Self {
        self.tools.retain(|t| t.tool.name != tool.name);
        self.tools.push(RegisteredTool {
            tool,
            handler: Arc::new(handler),
        });
        self
    }

    /// Server implementation info.
    pub fn info(&self) -> &Implementation {
        &self.info
    }

    /// Registered tool definitions, in registration order.
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.tool.clone()).collect()
    }

    /// Capabilities advertised at initialize.
    pub fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities::default().enable_tools().enable_logging()
    }

    /// Associate a transport with this engine. Must precede the transport's
    /// first `handle_request`.
    pub fn connect(self: &Arc<Self>, transport: &Arc<StreamableTransport>) -> Result<(), EngineError> {
        let mut connections = self.lock_connections();
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        if !transport.attach_engine(Arc::clone(self)) {
            return Err(EngineError::AlreadyConnected);
        }

        connections.retain(|w| w.strong_count() > 0);
        connections.push(Arc::downgrade(transport));
        tracing::debug!(
            session_id = ?transport.session_id(),
            connections = connections.len(),
            "Transport connected"
        );
        Ok(())
    }

    /// Number of connected transports that are still alive.
    pub fn connection_count(&self) -> usize {
        self.lock_connections()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub(crate) fn disconnect(&self, transport: &StreamableTransport) {
        let target: *const StreamableTransport = transport;
        self.lock_connections()
            .retain(|w| w.strong_count() > 0 && w.as_ptr() != target);
    }

    /// Whether `close()` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the engine and every transport still connected. Idempotent.
    pub async fn close(&self) {
        let transports: Vec<Arc<StreamableTransport>> = {
            let mut connections = self.lock_connections();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            connections.drain(..).filter_map(|w| w.upgrade()).collect()
        };

        for transport in &transports {
            if let Err(e) = transport.close().await {
                tracing::warn!(
                    session_id = ?transport.session_id(),
                    error = %e,
                    "Failed to close transport during engine shutdown"
                );
            }
        }

        tracing::info!(closed_transports = transports.len(), "Engine closed");
    }

    fn lock_connections(&self) -> std::sync::MutexGuard<'_, Vec<Weak<StreamableTransport>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer one message that arrived on `transport`. Notifications
    /// resolve to `Ok(Value::Null)`; failures are also recorded on the
    /// `mcp.dispatch` span.
    pub async fn dispatch(
        &self,
        transport: &Arc<StreamableTransport>,
        message: &JsonRpcMessage,
    ) -> Result<Value, ErrorData> {
        let request_id = message.id.as_ref().map(ToString::to_string).unwrap_or_default();
        let session_id = transport.session_id().unwrap_or_default().to_string();

        let span = tracing::info_span!(
            "mcp.dispatch",
            rpc.system = "jsonrpc",
            rpc.method = %message.method,
            rpc.jsonrpc.version = "2.0",
            rpc.jsonrpc.request_id = %request_id,
            mcp.session_id = %session_id,
            error.type = tracing::field::Empty,
            rpc.jsonrpc.error_code = tracing::field::Empty,
            rpc.jsonrpc.error_message = tracing::field::Empty,
        );

        async {
            let result = self.dispatch_inner(transport, &session_id, message).await;
            if let Err(ref error) = result {
                record_error_on_span(error);
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn dispatch_inner(
        &self,
        transport: &Arc<StreamableTransport>,
        session_id: &str,
        message: &JsonRpcMessage,
    ) -> Result<Value, ErrorData> {
        if message.is_notification() {
            match message.method.as_str() {
                "notifications/initialized" => {
                    tracing::info!(session_id = %session_id, "Client finished initializing");
                }
                "notifications/cancelled" => {
                    tracing::debug!(session_id = %session_id, "Client cancelled a request");
                }
                other => tracing::debug!(method = %other, "Unhandled notification"),
            }
            return Ok(Value::Null);
        }

        match message.method.as_str() {
            "initialize" => self.handle_initialize(message),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => to_result(&ListToolsResult::all(self.tools())),
            "tools/call" => self.handle_call_tool(transport, session_id, message).await,
            "logging/setLevel" => {
                let params: SetLevelParams = parse_params(message, "setLevel")?;
                transport.set_log_level(params.level);
                tracing::debug!(session_id = %session_id, level = ?params.level, "Log level set");
                Ok(serde_json::json!({}))
            }
            _ => Err(ErrorData::method_not_found(&message.method)),
        }
    }

    fn handle_initialize(&self, message: &JsonRpcMessage) -> Result<Value, ErrorData> {
        let params: InitializeParams = match &message.params {
            Some(p) => serde_json::from_value(p.clone())
                .map_err(|e| ErrorData::invalid_params(format!("Invalid initialize params: {}", e)))?,
            None => serde_json::from_value(serde_json::json!({}))
                .map_err(|e| ErrorData::internal_error(e.to_string()))?,
        };

        let version = negotiate_version(params.protocol_version.as_deref());
        if let Some(client) = &params.client_info {
            tracing::info!(
                client_name = %client.name,
                client_version = %client.version,
                protocol_version = %version,
                "Client handshake"
            );
        }

        let mut result = InitializeResult::new(self.info.clone(), self.capabilities())
            .with_protocol_version(version);
        if let Some(instructions) = &self.instructions {
            result = result.with_instructions(instructions.clone());
        }
        to_result(&result)
    }

    async fn handle_call_tool(
        &self,
        transport: &Arc<StreamableTransport>,
        session_id: &str,
        message: &JsonRpcMessage,
    ) -> Result<Value, ErrorData> {
        let params: CallToolParams = parse_params(message, "call")?;

        let registered = self
            .tools
            .iter()
            .find(|t| t.tool.name == params.name)
            .ok_or_else(|| ErrorData::tool_not_found(&params.name))?;

        let arguments = params
            .arguments
            .map(Value::Object)
            .unwrap_or(Value::Object(serde_json::Map::new()));

        let context = ToolContext {
            session_id: session_id.to_string(),
            request_id: message.id.clone(),
            peer: Peer::new(Arc::clone(transport)),
        };

        let tool_span = tracing::info_span!(
            "mcp.tool.call",
            mcp.tool.name = %params.name,
            mcp.session_id = %session_id,
        );

        async {
            let result = registered.handler.call(arguments, context).await?;
            to_result(&result)
        }
        .instrument(tool_span)
        .await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("info", &self.info)
            .field("tools", &self.tools.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn parse_params<T: DeserializeOwned>(message: &JsonRpcMessage, what: &str) -> Result<T, ErrorData> {
    message
        .params
        .as_ref()
        .map(|p| serde_json::from_value(p.clone()))
        .transpose()
        .map_err(|e| ErrorData::invalid_params(format!("Invalid {} params: {}", what, e)))?
        .ok_or_else(|| ErrorData::invalid_params(format!("Missing {} params", what)))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, ErrorData> {
    serde_json::to_value(value)
        .map_err(|e| ErrorData::internal_error(format!("result did not serialize: {e}")))
}

fn record_error_on_span(error: &ErrorData) {
    tracing::Span::current()
        .record("error.type", error_kind(error.code))
        .record("rpc.jsonrpc.error_code", error.code)
        .record("rpc.jsonrpc.error_message", error.message.as_str());
}

fn error_kind(code: i32) -> &'static str {
    match code {
        ErrorData::PARSE_ERROR => "parse_error",
        ErrorData::INVALID_REQUEST => "invalid_request",
        ErrorData::METHOD_NOT_FOUND => "method_not_found",
        ErrorData::INVALID_PARAMS => "invalid_params",
        ErrorData::INTERNAL_ERROR => "internal_error",
        ErrorData::SESSION_NOT_FOUND => "session_not_found",
        _ => "application_error",
    }
}
