//! Session Management
//!
//! A session is one client conversation spanning many HTTP requests. The
//! [`SessionRegistry`] maps session ids to the transport that owns each
//! session and is the single source of truth for which sessions are live.

mod registry;

pub use registry::SessionRegistry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::transport::StreamableTransport;

/// A live MCP session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session identifier, echoed in the `mcp-session-id` header.
    pub id: String,

    /// The transport servicing every request for this session.
    pub transport: Arc<StreamableTransport>,

    /// When the session was registered.
    pub created_at: Instant,
}

impl Session {
    /// Create a session record for a transport.
    pub fn new(id: impl Into<String>, transport: Arc<StreamableTransport>) -> Self {
        Self {
            id: id.into(),
            transport,
            created_at: Instant::now(),
        }
    }

    /// Time since the session was registered.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Statistics about live sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SessionStats {
    /// Number of registered sessions.
    pub total: usize,
    /// Sessions with a live standalone SSE stream.
    pub streaming: usize,
}
