//! Tool registry
//!
//! Manages registration and lookup of the tools served over `tools/*`.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::protocol::mcp::{ToolDefinition, ToolsCallResult};
use crate::protocol::GatewayError;
use crate::session::{SessionManager, SessionId};
use crate::task::TaskStore;

// ============================================================================
// Tool Types
// ============================================================================

/// Result type for tool execution
pub type ToolResult = Result<ToolsCallResult, GatewayError>;

/// Boxed future for async tool execution
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// Tool handler function type
pub type ToolHandler = Arc<dyn Fn(ToolContext, Value) -> ToolFuture + Send + Sync>;

/// A registered tool with metadata and handler
pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: ToolHandler,
}

impl RegisteredTool {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Context handed to tool handlers for one call
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub owner_id: String,
    /// Transport headers of the calling session
    pub headers: HashMap<String, String>,
    pub sessions: Arc<SessionManager>,
    pub tasks: Arc<TaskStore>,
    pub tool_count: usize,
    pub server_version: String,
    pub start_time: std::time::Instant,
}

// ============================================================================
// Registry
// ============================================================================

/// Tools keyed by name. Iteration order is by name, which keeps
/// `tools/list` pages stable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register_tool(&mut self, tool: RegisteredTool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get_tool(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// One page of tool definitions starting at `offset`, plus the offset of
    /// the next page if there is one.
    pub fn list_page(&self, offset: usize, limit: usize) -> (Vec<ToolDefinition>, Option<usize>) {
        let limit = limit.max(1);
        let page: Vec<ToolDefinition> = self
            .tools
            .values()
            .skip(offset)
            .take(limit)
            .map(RegisteredTool::definition)
            .collect();
        let next = offset + page.len();
        let next = (next < self.tools.len() && !page.is_empty()).then_some(next);
        (page, next)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

// ============================================================================
// Builder helpers
// ============================================================================

/// Builder for registering a tool
pub struct ToolBuilder {
    name: String,
    description: String,
    input_schema: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> RegisteredTool
    where
        F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        RegisteredTool {
            name: self.name,
            description: self.description,
            input_schema: self.input_schema,
            handler: Arc::new(move |ctx, params| Box::pin(handler(ctx, params))),
        }
    }
}
