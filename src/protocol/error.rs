//! Error taxonomy (JSON-RPC + gateway specific codes).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error object as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Gateway error types
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayError {
    // JSON-RPC standard errors
    ParseError(String),
    InvalidRequest(String),
    MethodNotFound(String),
    InvalidParams(String),
    InternalError(String),

    // Gateway specific errors
    TaskNotFound(String),
    TaskNotCancelable(String),
    RateLimited {
        dimension: &'static str,
        retry_after_ms: u64,
    },
    ResourceNotFound(String),
    ToolExecutionFailed(String),

    /// Explicit error raised by a handler, passed through verbatim.
    Rpc { code: i32, message: String },
}

impl GatewayError {
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::ParseError(_) => -32700,
            GatewayError::InvalidRequest(_) => -32600,
            GatewayError::MethodNotFound(_) => -32601,
            GatewayError::InvalidParams(_) => -32602,
            GatewayError::InternalError(_) => -32603,
            GatewayError::TaskNotFound(_) => -32001,
            GatewayError::TaskNotCancelable(_) => -32002,
            GatewayError::RateLimited { .. } => -32003,
            GatewayError::ResourceNotFound(_) => -32004,
            GatewayError::ToolExecutionFailed(_) => -32005,
            GatewayError::Rpc { code, .. } => *code,
        }
    }

    pub fn message(&self) -> String {
        match self {
            GatewayError::ParseError(msg) => format!("Parse error: {}", msg),
            GatewayError::InvalidRequest(msg) => format!("Invalid request: {}", msg),
            GatewayError::MethodNotFound(method) => format!("Method not found: {}", method),
            GatewayError::InvalidParams(msg) => format!("Invalid params: {}", msg),
            GatewayError::InternalError(msg) => format!("Internal error: {}", msg),
            GatewayError::TaskNotFound(id) => format!("Task not found: {}", id),
            GatewayError::TaskNotCancelable(id) => format!("Task cannot be canceled: {}", id),
            GatewayError::RateLimited {
                dimension,
                retry_after_ms,
            } => format!(
                "Rate limit exceeded ({}), retry after {} ms",
                dimension, retry_after_ms
            ),
            GatewayError::ResourceNotFound(uri) => format!("Resource not found: {}", uri),
            GatewayError::ToolExecutionFailed(msg) => format!("Tool execution failed: {}", msg),
            GatewayError::Rpc { message, .. } => message.clone(),
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for GatewayError {}

impl From<GatewayError> for RpcError {
    fn from(err: GatewayError) -> Self {
        let data = match &err {
            GatewayError::RateLimited {
                dimension,
                retry_after_ms,
            } => Some(serde_json::json!({
                "dimension": dimension,
                "retry_after_ms": retry_after_ms,
            })),
            _ => None,
        };

        RpcError {
            code: err.code(),
            message: err.message(),
            data,
        }
    }
}

impl From<RpcError> for GatewayError {
    fn from(err: RpcError) -> Self {
        GatewayError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(GatewayError::ParseError("".to_string()).code(), -32700);
        assert_eq!(GatewayError::InvalidRequest("".to_string()).code(), -32600);
        assert_eq!(GatewayError::MethodNotFound("".to_string()).code(), -32601);
        assert_eq!(GatewayError::InvalidParams("".to_string()).code(), -32602);
        assert_eq!(GatewayError::InternalError("".to_string()).code(), -32603);
        assert_eq!(GatewayError::TaskNotFound("".to_string()).code(), -32001);
        assert_eq!(
            GatewayError::RateLimited {
                dimension: "per-second",
                retry_after_ms: 500
            }
            .code(),
            -32003
        );
        assert_eq!(
            GatewayError::Rpc {
                code: -32099,
                message: "custom".to_string()
            }
            .code(),
            -32099
        );
    }

    #[test]
    fn test_rate_limited_carries_data() {
        let rpc: RpcError = GatewayError::RateLimited {
            dimension: "per-minute",
            retry_after_ms: 1200,
        }
        .into();
        assert_eq!(rpc.code, -32003);
        let data = rpc.data.unwrap();
        assert_eq!(data["dimension"], "per-minute");
        assert_eq!(data["retry_after_ms"], 1200);
    }

    #[test]
    fn test_display_matches_message() {
        let err = GatewayError::MethodNotFound("foo/bar".to_string());
        assert_eq!(err.to_string(), "Method not found: foo/bar");
    }

    #[test]
    fn test_rpc_round_trips_code() {
        let err: GatewayError = RpcError::new(-32050, "upstream").into();
        assert_eq!(err.code(), -32050);
        assert_eq!(err.message(), "upstream");
    }
}
