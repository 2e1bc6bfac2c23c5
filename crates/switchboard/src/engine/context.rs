//! Tool handlers and the context they run with.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::transport::{StreamableTransport, TransportError};
use crate::types::error::ErrorData;
use crate::types::jsonrpc::{JsonRpcMessage, RequestId};
use crate::types::logging::LogMessage;
use crate::types::tool::CallToolResult;

/// A callable tool.
///
/// Implemented for any `Fn(Value, ToolContext) -> impl Future<Output =
/// Result<CallToolResult, ErrorData>>`, so async closures can be registered
/// directly.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Run the tool with its JSON arguments.
    async fn call(&self, arguments: Value, context: ToolContext) -> Result<CallToolResult, ErrorData>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult, ErrorData>> + Send + 'static,
{
    async fn call(&self, arguments: Value, context: ToolContext) -> Result<CallToolResult, ErrorData> {
        (self)(arguments, context).await
    }
}

/// Context passed to tool calls.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Session the call arrived on.
    pub session_id: String,

    /// JSON-RPC id of the `tools/call` request.
    pub request_id: Option<RequestId>,

    /// Route back to the client.
    pub peer: Peer,
}

/// Handle for sending server-originated messages to one session.
#[derive(Debug, Clone)]
pub struct Peer {
    transport: Arc<StreamableTransport>,
}

impl Peer {
    pub fn new(transport: Arc<StreamableTransport>) -> Self {
        Self { transport }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.transport.session_id()
    }

    /// Send an arbitrary notification.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let message = JsonRpcMessage::notification(method, params);
        self.transport.notify(&message).await.map(|_| ())
    }

    /// Send a `notifications/message` log notification.
    ///
    /// Returns `false` when the session's log level filtered it out.
    pub async fn log(&self, message: LogMessage) -> Result<bool, TransportError> {
        if !self.transport.should_log(message.level) {
            return Ok(false);
        }
        let params = serde_json::to_value(&message)?;
        self.notify("notifications/message", params).await?;
        Ok(true)
    }
}
