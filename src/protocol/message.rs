//! JSON-RPC message envelope.
//!
//! A single envelope type is used for requests, notifications and responses,
//! since validators have to inspect messages before anyone knows which of
//! the three they are.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{GatewayError, RpcError};

/// JSON-RPC version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Request ID can be string or number
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    /// Length in bytes of the id as it appears on the wire (without quotes).
    pub fn byte_len(&self) -> usize {
        match self {
            RequestId::String(s) => s.len(),
            RequestId::Number(n) => n.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestId::String(s) if s.is_empty())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId::String(value)
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

/// Protocol envelope exchanged with the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Set once a handler has consumed the message. Never serialized.
    #[serde(skip)]
    pub processed: bool,
}

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

impl Message {
    fn empty() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
            meta: None,
            processed: false,
        }
    }

    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::empty()
        }
    }

    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            ..Self::empty()
        }
    }

    pub fn error(id: Option<RequestId>, error: GatewayError) -> Self {
        Self::error_response(id, error.into())
    }

    pub fn error_response(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            id,
            error: Some(error),
            ..Self::empty()
        }
    }

    /// Parse a raw JSON text frame.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(text).map_err(|e| GatewayError::ParseError(e.to_string()))
    }

    /// A request names a method and carries an id.
    pub fn is_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    /// A notification names a method but carries no id.
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    /// A response carries a non-empty id and no method.
    pub fn is_response(&self) -> bool {
        self.method.is_none() && self.id.as_ref().is_some_and(|id| !id.is_empty())
    }

    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or("")
    }

    /// Serialized size of the `params` region, if any.
    pub fn params_size(&self) -> Result<Option<usize>, serde_json::Error> {
        self.params
            .as_ref()
            .map(|params| serde_json::to_vec(params).map(|bytes| bytes.len()))
            .transpose()
    }

    pub fn mark_processed(&mut self) {
        self.processed = true;
    }
}
