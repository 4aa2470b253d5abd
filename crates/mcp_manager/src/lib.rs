#![forbid(unsafe_code)]
//! Supervisor and client-side MCP plumbing for stdio servers.
//!
//! The [`Manager`] reads `mcp_config.json`, launches each configured server
//! as a long-lived child process, speaks JSON-RPC 2.0 over the child's
//! stdin/stdout (one JSON object per line), performs the MCP `initialize`
//! handshake, discovers tools/resources/prompts, and dispatches
//! `tools/call`, `resources/read`, and `prompts/get` with per-request
//! timeouts. Every significant state change is published on the
//! [`gateway_events`] bus.
//!
//! ## Lifecycle
//! - Children are spawned with fully piped stdio and `kill_on_drop`; a
//!   session owns its child handle, a stdout reader task that correlates
//!   replies by id, a stderr reader task that forwards diagnostics, and a
//!   writer task that serializes whole messages.
//! - Stopping asks politely first (SIGTERM on POSIX), waits five seconds,
//!   then kills. A child that exits on its own triggers the same cleanup:
//!   catalogs cleared, state `stopped`, `server_stopped` emitted once.
//! - RPC requests carry a per-request deadline (ten seconds unless
//!   configured otherwise); expiry abandons the pending slot without
//!   killing the child, and any late reply is discarded.
//!
//! ## Error model
//! [`McpError`] distinguishes unknown server ids, dead sessions, spawn
//! failures, timeouts, transport failures, and JSON-RPC `error` replies so
//! callers can map each onto a sensible HTTP response.

mod config;
mod error;
mod manager;
mod process;
mod session;
mod types;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests;

pub use error::{ConfigError, McpError};
pub use manager::{
    ConfigSummary, Manager, CLIENT_NAME, DEFAULT_REQUEST_TIMEOUT, PROTOCOL_VERSION,
};
pub use types::{
    PromptDescriptor, ResourceDescriptor, ServerDescriptor, ServerState, ServerStatus,
    ToolDescriptor,
};
