//! Session lifecycle: per-connection protocol state, the registry that owns
//! live sessions, and the client-side request correlator.

mod correlator;
mod manager;
mod state;

pub use correlator::{ClientSettings, CorrelatorError, RequestCorrelator, ResponseHandle};
pub use manager::{CloseReason, SessionManager, DEFAULT_OUTBOUND_BUFFER};
pub use state::{
    Session, SessionId, SessionKind, SessionParams, SessionState, SessionStatus, SessionSummary,
};

use crate::protocol::RequestId;

/// Errors raised by session and registry operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session {0} is closed")]
    Closed(SessionId),

    #[error("session {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("request id {0} is already pending")]
    DuplicateRequest(RequestId),

    #[error("session {0} outbound channel is disconnected")]
    Disconnected(SessionId),
}
