//! WebSocket adapter.
//!
//! Inbound messages are JSON objects with a `type` of `ping`, `get_status`,
//! or `call_tool` and an optional `request_id`; every reply mirrors the
//! type and echoes the `request_id`. Replies come from explicit manager
//! calls, not from the event bus.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::AppState;

#[derive(Debug, Deserialize)]
struct Inbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    request_id: Value,
    server_id: Option<String>,
    tool_name: Option<String>,
    #[serde(default)]
    arguments: Value,
}

pub(crate) async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(Ok(message)) = receiver.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let reply = dispatch(&state, &text).await;
        if sender.send(Message::Text(reply.to_string())).await.is_err() {
            break;
        }
    }

    debug!("websocket client disconnected");
}

async fn dispatch(state: &AppState, text: &str) -> Value {
    let inbound: Inbound = match serde_json::from_str(text) {
        Ok(inbound) => inbound,
        Err(err) => return error_reply(Value::Null, &format!("invalid message: {err}")),
    };
    let request_id = inbound.request_id.clone();

    match inbound.kind.as_str() {
        "ping" => json!({ "type": "pong", "request_id": request_id }),
        "get_status" => match inbound.server_id {
            Some(id) => match state.manager.get_status(&id).await {
                Ok(status) => {
                    json!({ "type": "status", "request_id": request_id, "data": status })
                }
                Err(err) => error_reply(request_id, &err.to_string()),
            },
            None => {
                let statuses = state.manager.statuses().await;
                json!({ "type": "status", "request_id": request_id, "data": statuses })
            }
        },
        "call_tool" => {
            let (Some(server_id), Some(tool_name)) = (inbound.server_id, inbound.tool_name) else {
                return error_reply(request_id, "call_tool requires server_id and tool_name");
            };
            let arguments = match inbound.arguments {
                Value::Null => json!({}),
                other => other,
            };
            match state
                .manager
                .call_tool(&server_id, &tool_name, arguments)
                .await
            {
                Ok(result) => {
                    json!({ "type": "tool_result", "request_id": request_id, "data": result })
                }
                Err(err) => error_reply(request_id, &err.to_string()),
            }
        }
        other => error_reply(request_id, &format!("unknown message type `{other}`")),
    }
}

fn error_reply(request_id: Value, message: &str) -> Value {
    json!({ "type": "error", "request_id": request_id, "error": message })
}

#[cfg(test)]
mod tests {
    use mcp_manager::Manager;
    use serde_json::json;

    use super::*;

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = dir.path().join("mcp_config.json");
        let document = json!({ "mcpServers": { "demo": { "command": "stub-server" } } });
        std::fs::write(&config, document.to_string()).expect("write config");

        let (bus, events) = gateway_events::bounded(gateway_events::DEFAULT_CAPACITY);
        let manager = Manager::new(&config, bus);
        manager.load_config().await.expect("load config");
        (AppState::new(manager, events), dir)
    }

    #[tokio::test]
    async fn ping_echoes_request_id() {
        let (state, _dir) = test_state().await;
        let reply = dispatch(&state, r#"{"type":"ping","request_id":7}"#).await;
        assert_eq!(reply, json!({ "type": "pong", "request_id": 7 }));
    }

    #[tokio::test]
    async fn get_status_without_id_returns_all() {
        let (state, _dir) = test_state().await;
        let reply = dispatch(&state, r#"{"type":"get_status","request_id":"r1"}"#).await;
        assert_eq!(reply["type"], "status");
        assert_eq!(reply["request_id"], "r1");
        assert_eq!(reply["data"][0]["server_id"], "demo");
    }

    #[tokio::test]
    async fn get_status_for_unknown_server_errors() {
        let (state, _dir) = test_state().await;
        let reply = dispatch(
            &state,
            r#"{"type":"get_status","request_id":1,"server_id":"ghost"}"#,
        )
        .await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["request_id"], 1);
    }

    #[tokio::test]
    async fn call_tool_requires_target_fields() {
        let (state, _dir) = test_state().await;
        let reply = dispatch(&state, r#"{"type":"call_tool","request_id":2}"#).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["request_id"], 2);
    }

    #[tokio::test]
    async fn unknown_message_type_errors() {
        let (state, _dir) = test_state().await;
        let reply = dispatch(&state, r#"{"type":"subscribe","request_id":3}"#).await;
        assert_eq!(reply["type"], "error");
    }

    #[tokio::test]
    async fn malformed_json_errors_without_request_id() {
        let (state, _dir) = test_state().await;
        let reply = dispatch(&state, "not json").await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["request_id"], Value::Null);
    }
}
