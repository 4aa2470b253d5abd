#![forbid(unsafe_code)]
//! HTTP surface for the MCP supervisor.
//!
//! Thin adapters over [`mcp_manager::Manager`]: a REST router for status,
//! catalogs, dispatch, and lifecycle control; an SSE endpoint streaming the
//! event bus (with a heartbeat when the bus is idle); and a WebSocket that
//! answers `ping`, `get_status`, and `call_tool` messages with a
//! `request_id` echo.

mod routes;
mod sse;
mod ws;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use gateway_events::EventReceiver;
use mcp_manager::Manager;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use sse::SseHub;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub sse: SseHub,
}

impl AppState {
    /// Wire the manager and the bus receiver into handler state, spawning
    /// the SSE broadcaster task.
    pub fn new(manager: Arc<Manager>, events: EventReceiver) -> Self {
        Self {
            manager,
            sse: sse::spawn_broadcaster(events),
        }
    }
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/status", get(routes::all_statuses))
        .route("/status/:id", get(routes::server_status))
        .route("/servers/control", post(routes::control_server))
        .route("/tools", get(routes::all_tools))
        .route("/tools/:id", get(routes::server_tools))
        .route("/tools/call", post(routes::call_tool))
        .route("/resources", get(routes::all_resources))
        .route("/resources/:id", get(routes::server_resources))
        .route("/resources/read", post(routes::read_resource))
        .route("/prompts", get(routes::all_prompts))
        .route("/prompts/:id", get(routes::server_prompts))
        .route("/prompts/get", post(routes::get_prompt))
        .route("/events", get(sse::events))
        .route("/auto-start", post(routes::auto_start))
        .route("/config", get(routes::config))
        .route("/config/reload", post(routes::reload_config))
        .route("/ws", get(ws::upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
