//! Built-in tools
//!
//! `echo` returns its input; `gateway_status` reports live counts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::{RegisteredTool, ToolBuilder, ToolContext, ToolRegistry, ToolResult};
use crate::protocol::mcp::ToolsCallResult;
use crate::protocol::GatewayError;

/// Register all built-in tools with the registry
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register_tool(echo_tool());
    registry.register_tool(gateway_status_tool());
}

// ============================================================================
// echo
// ============================================================================

#[derive(Debug, Deserialize)]
struct EchoParams {
    text: String,
}

fn echo_tool() -> RegisteredTool {
    ToolBuilder::new("echo")
        .description("Return the given text unchanged")
        .input_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to echo back"
                }
            },
            "required": ["text"]
        }))
        .build(execute_echo)
}

async fn execute_echo(_ctx: ToolContext, params: Value) -> ToolResult {
    let params: EchoParams =
        serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))?;
    Ok(ToolsCallResult::text(params.text))
}

// ============================================================================
// gateway_status
// ============================================================================

#[derive(Debug, Serialize)]
struct GatewayStatus {
    version: String,
    uptime_secs: u64,
    active_sessions: usize,
    registered_tools: usize,
    stored_tasks: usize,
    caller_session: String,
}

fn gateway_status_tool() -> RegisteredTool {
    ToolBuilder::new("gateway_status")
        .description("Report gateway version, uptime, live sessions, tools and stored tasks")
        .build(execute_gateway_status)
}

async fn execute_gateway_status(ctx: ToolContext, _params: Value) -> ToolResult {
    let status = GatewayStatus {
        version: ctx.server_version.clone(),
        uptime_secs: ctx.start_time.elapsed().as_secs(),
        active_sessions: ctx.sessions.session_count().await,
        registered_tools: ctx.tool_count,
        stored_tasks: ctx.tasks.len(),
        caller_session: ctx.session_id.clone(),
    };
    ToolsCallResult::json(&status).map_err(|e| GatewayError::ToolExecutionFailed(e.to_string()))
}
