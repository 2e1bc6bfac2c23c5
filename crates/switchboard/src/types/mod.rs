//! Wire types for the slice of MCP 2025-06-18 this server speaks.
//!
//! `jsonrpc` holds the envelopes and classifies inbound bodies; the rest are
//! method payloads (`protocol` for the handshake, `tool`, `content`,
//! `logging`) plus `error` for JSON-RPC error objects.

pub mod content;
pub mod error;
pub mod jsonrpc;
pub mod logging;
pub mod protocol;
pub mod tool;
