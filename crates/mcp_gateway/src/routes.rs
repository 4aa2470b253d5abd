//! REST handlers, thin over the manager's operations.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use mcp_manager::McpError;

use crate::AppState;

/// Manager failure mapped onto an HTTP status and a `detail` body.
pub(crate) struct ApiError(McpError);

impl From<McpError> for ApiError {
    fn from(err: McpError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            McpError::UnknownServer(_) => StatusCode::NOT_FOUND,
            McpError::NotRunning(_) => StatusCode::CONFLICT,
            McpError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            McpError::Config(_) => StatusCode::BAD_REQUEST,
            McpError::Rpc { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn empty_object() -> Value {
    json!({})
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerControlRequest {
    pub server_id: String,
    pub action: ControlAction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ControlAction {
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ToolCallRequest {
    pub server_id: String,
    pub tool_name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResourceReadRequest {
    pub server_id: String,
    pub uri: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PromptGetRequest {
    pub server_id: String,
    pub prompt_name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

pub(crate) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn all_statuses(State(state): State<AppState>) -> ApiResult {
    let statuses = state.manager.statuses().await;
    Ok(Json(json!({ "servers": statuses })))
}

pub(crate) async fn server_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let status = state.manager.get_status(&id).await?;
    Ok(Json(serde_json::to_value(status).map_err(McpError::from)?))
}

pub(crate) async fn control_server(
    State(state): State<AppState>,
    Json(request): Json<ServerControlRequest>,
) -> ApiResult {
    let success = match request.action {
        ControlAction::Start => state.manager.start_server(&request.server_id).await?,
        ControlAction::Stop => state.manager.stop_server(&request.server_id).await?,
        ControlAction::Restart => state.manager.restart_server(&request.server_id).await?,
    };
    Ok(Json(json!({ "server_id": request.server_id, "success": success })))
}

pub(crate) async fn all_tools(State(state): State<AppState>) -> ApiResult {
    let tools = state.manager.all_tools().await;
    Ok(Json(serde_json::to_value(tools).map_err(McpError::from)?))
}

pub(crate) async fn server_tools(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let tools = state.manager.list_tools(&id).await?;
    Ok(Json(json!({ "server_id": id, "tools": tools })))
}

pub(crate) async fn call_tool(
    State(state): State<AppState>,
    Json(request): Json<ToolCallRequest>,
) -> ApiResult {
    let result = state
        .manager
        .call_tool(&request.server_id, &request.tool_name, request.arguments)
        .await?;
    Ok(Json(json!({ "server_id": request.server_id, "result": result })))
}

pub(crate) async fn all_resources(State(state): State<AppState>) -> ApiResult {
    let resources = state.manager.all_resources().await;
    Ok(Json(serde_json::to_value(resources).map_err(McpError::from)?))
}

pub(crate) async fn server_resources(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let resources = state.manager.list_resources(&id).await?;
    Ok(Json(json!({ "server_id": id, "resources": resources })))
}

pub(crate) async fn read_resource(
    State(state): State<AppState>,
    Json(request): Json<ResourceReadRequest>,
) -> ApiResult {
    let content = state
        .manager
        .read_resource(&request.server_id, &request.uri)
        .await?;
    Ok(Json(json!({
        "server_id": request.server_id,
        "uri": request.uri,
        "content": content,
    })))
}

pub(crate) async fn all_prompts(State(state): State<AppState>) -> ApiResult {
    let prompts = state.manager.all_prompts().await;
    Ok(Json(serde_json::to_value(prompts).map_err(McpError::from)?))
}

pub(crate) async fn server_prompts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let prompts = state.manager.list_prompts(&id).await?;
    Ok(Json(json!({ "server_id": id, "prompts": prompts })))
}

pub(crate) async fn get_prompt(
    State(state): State<AppState>,
    Json(request): Json<PromptGetRequest>,
) -> ApiResult {
    let result = state
        .manager
        .get_prompt(&request.server_id, &request.prompt_name, request.arguments)
        .await?;
    Ok(Json(json!({ "server_id": request.server_id, "result": result })))
}

pub(crate) async fn auto_start(State(state): State<AppState>) -> ApiResult {
    let started = state.manager.auto_start().await;
    Ok(Json(json!({ "started": started })))
}

pub(crate) async fn config(State(state): State<AppState>) -> ApiResult {
    let servers = state.manager.list_servers().await;
    Ok(Json(json!({ "servers": servers })))
}

pub(crate) async fn reload_config(State(state): State<AppState>) -> ApiResult {
    let summary = state.manager.load_config().await.map_err(McpError::from)?;
    Ok(Json(serde_json::to_value(summary).map_err(McpError::from)?))
}
