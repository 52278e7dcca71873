//! Session registry.
//!
//! Owns every live [`Session`]. The map lock is only held for lookups and
//! inserts/removals; closing sessions and delivering notifications happen
//! on snapshots taken under the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::state::{Session, SessionId, SessionKind, SessionParams, SessionStatus, SessionSummary};
use super::SessionError;
use crate::metrics;
use crate::protocol::Message;

/// Outbound queue depth per session
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Why a session left the registry. Used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Explicit,
    Idle,
    Shutdown,
    Disconnected,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Explicit => "explicit",
            CloseReason::Idle => "idle",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Disconnected => "disconnected",
        }
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    outbound_buffer: usize,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_BUFFER)
    }
}

impl SessionManager {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            outbound_buffer,
        }
    }

    /// Register a new session.
    ///
    /// Returns the session and the receiver the transport drains for
    /// outbound messages. The receiver yields `None` once the session closes.
    pub async fn create_session(
        &self,
        owner_id: &str,
        kind: SessionKind,
        params: SessionParams,
    ) -> (Arc<Session>, mpsc::Receiver<Message>) {
        let mut sessions = self.sessions.write().await;

        let mut id = uuid::Uuid::new_v4().to_string();
        while sessions.contains_key(&id) {
            id = uuid::Uuid::new_v4().to_string();
        }

        let (session, rx) = Session::new(id.clone(), owner_id, kind, params, self.outbound_buffer);
        let session = Arc::new(session);
        sessions.insert(id.clone(), session.clone());
        drop(sessions);

        metrics::record_session_created();
        debug!("Created {:?} session {} for owner {}", kind, id, owner_id);
        (session, rx)
    }

    pub async fn get_session(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Close and remove a session. Unknown ids are a logged no-op.
    pub async fn close_session(&self, id: &str) -> bool {
        self.close_with_reason(id, CloseReason::Explicit).await
    }

    pub async fn close_with_reason(&self, id: &str, reason: CloseReason) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                session.close();
                metrics::record_session_closed(reason.as_str());
                debug!("Closed session {} ({})", id, reason.as_str());
                true
            }
            None => {
                debug!("Close requested for unknown session {}", id);
                false
            }
        }
    }

    /// Close every session concurrently and wait for all of them.
    pub async fn close_all_sessions(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        let results = join_all(
            ids.iter()
                .map(|id| self.close_with_reason(id, CloseReason::Shutdown)),
        )
        .await;
        let closed = results.into_iter().filter(|closed| *closed).count();
        info!("Closed {} session(s)", closed);
        closed
    }

    /// Send a notification to every `Connected` session.
    ///
    /// Sessions whose outbound channel has gone away are closed. Returns the
    /// number of successful deliveries.
    pub async fn notify_eligible_sessions(&self, method: &str, params: Option<Value>) -> usize {
        let eligible: Vec<Arc<Session>> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|session| session.status() == SessionStatus::Connected)
            .cloned()
            .collect();

        let message = Message::notification(method, params);
        let results = join_all(eligible.iter().map(|session| {
            let message = message.clone();
            async move { (session.id().to_string(), session.send(message).await) }
        }))
        .await;

        let mut delivered = 0;
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Failed to notify session {}: {}", id, e);
                    self.close_with_reason(&id, CloseReason::Disconnected).await;
                }
            }
        }
        delivered
    }

    /// Close sessions that have been idle longer than `timeout`.
    pub async fn cleanup_idle_sessions(&self, timeout: Duration) -> usize {
        let candidates: Vec<SessionId> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|session| session.is_idle(timeout))
            .map(|session| session.id().to_string())
            .collect();

        let mut evicted = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            for id in candidates {
                // Activity may have happened since the snapshot.
                if sessions.get(&id).is_some_and(|s| s.is_idle(timeout)) {
                    if let Some(session) = sessions.remove(&id) {
                        evicted.push(session);
                    }
                }
            }
        }

        for session in &evicted {
            session.close();
            metrics::record_session_closed(CloseReason::Idle.as_str());
            info!(
                "Evicted idle session {} (idle for {:?})",
                session.id(),
                session.idle_for()
            );
        }
        evicted.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        sessions.iter().map(|session| session.summary()).collect()
    }
}
