//! Pezzottify Gateway Library
//!
//! Session-oriented JSON-RPC gateway core: session registry, validation
//! pipeline, request correlation and the agent-task executor. Transports
//! plug in through [`Gateway`].

pub mod config;
pub mod gateway;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod task;
pub mod validation;

// Re-export commonly used types for convenience
pub use gateway::{Gateway, GatewaySettings, SessionSweeper};
pub use protocol::{GatewayError, Message, RequestId, RpcError};
pub use session::{RequestCorrelator, Session, SessionKind, SessionManager, SessionParams};
