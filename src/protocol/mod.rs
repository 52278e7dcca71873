//! Gateway Protocol Types
//!
//! Both protocol families the gateway speaks are JSON-RPC 2.0 underneath:
//! the MCP tool-invocation family (`tools/*`, `resources/*`, ...) and the
//! A2A agent-task family (`tasks/*`). This module holds the shared envelope,
//! the error taxonomy and the payload types of both families.

pub mod a2a;
pub mod error;
pub mod mcp;
pub mod message;
pub mod methods;

pub use error::{GatewayError, RpcError};
pub use message::{Message, RequestId, JSONRPC_VERSION};
pub use methods::MethodAllowList;
