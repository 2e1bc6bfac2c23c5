//! switchboard - session-routing MCP server transport for axum
//!
//! Serves the MCP Streamable HTTP transport with many concurrent sessions
//! behind a single endpoint.
//!
//! # Components
//!
//! - **Engine**: shared protocol engine holding the tool registry
//! - **SessionRegistry**: concurrent map of live sessions
//! - **StreamableTransport**: per-session HTTP framing, SSE stream, hooks
//! - **EventStore**: resumable SSE streams via `Last-Event-ID`
//! - **router**: picks (or creates) the transport for each request
//! - **Lifecycle**: drains every session and stops the listener on shutdown
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchboard::{CallToolResult, Engine, McpState, Tool, ToolContext};
//!
//! let engine = Arc::new(Engine::new("my-server", "0.1.0").tool(
//!     Tool::new("hello", "Say hello"),
//!     |_args: serde_json::Value, _ctx: ToolContext| async move {
//!         Ok::<_, switchboard::ErrorData>(CallToolResult::text("Hello!"))
//!     },
//! ));
//!
//! let state = Arc::new(McpState::new(engine));
//! let app = axum::Router::new().nest("/mcp", switchboard::router(state));
//! ```

pub mod engine;
pub mod event_store;
pub mod lifecycle;
pub mod router;
pub mod session;
pub mod transport;
pub mod types;

// Re-export commonly used types at crate root
pub use types::content::Content;
pub use types::error::ErrorData;
pub use types::jsonrpc::{JsonRpcMessage, JsonRpcResponse, RequestId};
pub use types::logging::{LogLevel, LogMessage};
pub use types::protocol::{Implementation, ServerCapabilities};
pub use types::tool::{schema_for, CallToolResult, Tool, ToolAnnotations, ToolSchema};

pub use engine::{Engine, EngineError, Peer, ToolContext, ToolHandler};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore};
pub use lifecycle::{drain_sessions, Lifecycle, ShutdownReport};
pub use router::{route_post, router, McpState, PostRoute, RouterOptions};
pub use session::{Session, SessionRegistry, SessionStats};
pub use transport::{
    IncomingRequest, StreamableTransport, TransportError, TransportOptions, SESSION_HEADER,
};
