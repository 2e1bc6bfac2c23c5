//! operator - template MCP server on the switchboard session router
//!
//! This library provides:
//! - `greeter`: example greeting tools
//! - `serve`: HTTP app, listener, signal handling and shutdown
//! - `telemetry`: tracing subscriber and OTLP export

pub mod greeter;
pub mod serve;
pub mod telemetry;
