use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use super::SessionError;
use crate::protocol::{Message, RequestId};
use crate::validation::RateLimiterPair;

pub type SessionId = String;

/// Connection status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionStatus {
    Connecting,
    Connected,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Closed => "closed",
        }
    }
}

/// Which side of the conversation a session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Inbound client traffic dispatched by the gateway.
    Server,
    /// Outbound connection driven by a [`super::RequestCorrelator`].
    Client,
}

/// Values supplied by the transport when a session is opened.
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    /// Opaque transport context, e.g. the original request headers.
    pub context: HashMap<String, String>,
    pub requests_per_minute: Option<u32>,
    pub requests_per_second: Option<u32>,
}

/// Mutable per-session state touched by validators and handlers.
#[derive(Debug, Default)]
pub struct SessionState {
    pub rpm_override: Option<u32>,
    pub rps_override: Option<u32>,
    /// Created on the first throttled message.
    pub limiters: Option<RateLimiterPair>,
    pub log_level: Option<String>,
}

/// Point-in-time view of a session for listings.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: SessionId,
    pub owner_id: String,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub idle_for: Duration,
}

#[derive(Debug)]
struct PendingEntry {
    method: String,
    responder: oneshot::Sender<Message>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single logical connection.
///
/// Locks are only held for map and field updates; anything that awaits
/// (outbound sends) works on a cloned sender. When both are needed, the
/// pending table is locked before the status.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    owner_id: String,
    kind: SessionKind,
    context: HashMap<String, String>,
    status: Mutex<SessionStatus>,
    last_activity: Mutex<Instant>,
    state: Mutex<SessionState>,
    pending: Mutex<HashMap<RequestId, PendingEntry>>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    next_request_id: AtomicI64,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        owner_id: &str,
        kind: SessionKind,
        params: SessionParams,
        outbound_buffer: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(outbound_buffer.max(1));
        let session = Self {
            id,
            owner_id: owner_id.to_string(),
            kind,
            context: params.context,
            status: Mutex::new(SessionStatus::Connecting),
            last_activity: Mutex::new(Instant::now()),
            state: Mutex::new(SessionState {
                rpm_override: params.requests_per_minute,
                rps_override: params.requests_per_second,
                ..SessionState::default()
            }),
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(Some(tx)),
            next_request_id: AtomicI64::new(1),
        };
        (session, rx)
    }

    /// A session that is not registered anywhere and whose outbound channel
    /// has no reader. Useful for exercising validators in isolation.
    pub fn detached(owner_id: &str, kind: SessionKind, params: SessionParams) -> Self {
        let (session, _rx) = Self::new(uuid::Uuid::new_v4().to_string(), owner_id, kind, params, 1);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Transport-supplied context captured at creation.
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn status(&self) -> SessionStatus {
        *lock(&self.status)
    }

    pub fn is_closed(&self) -> bool {
        self.status() == SessionStatus::Closed
    }

    /// Move the session forward. Re-entering the current state is allowed;
    /// moving backwards or out of `Closed` is not. `Closed` is only reached
    /// through [`Session::close`], which also releases pending waiters.
    pub fn transition(&self, to: SessionStatus) -> Result<(), SessionError> {
        let mut status = lock(&self.status);
        if *status == SessionStatus::Closed {
            return Err(SessionError::Closed(self.id.clone()));
        }
        if to < *status || to == SessionStatus::Closed {
            return Err(SessionError::InvalidTransition {
                id: self.id.clone(),
                from: *status,
                to,
            });
        }
        *status = to;
        Ok(())
    }

    pub fn mark_connected(&self) -> Result<(), SessionError> {
        self.transition(SessionStatus::Connected)
    }

    pub fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_activity())
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.idle_for() > timeout
    }

    /// Run `f` with exclusive access to the typed session state.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut *lock(&self.state))
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            kind: self.kind,
            status: self.status(),
            idle_for: self.idle_for(),
        }
    }

    /// Fresh id for an outbound request on this session.
    pub fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a waiter for the response to `request_id`.
    pub fn register_pending(
        &self,
        request_id: RequestId,
        method: &str,
    ) -> Result<oneshot::Receiver<Message>, SessionError> {
        let mut pending = lock(&self.pending);
        if *lock(&self.status) == SessionStatus::Closed {
            return Err(SessionError::Closed(self.id.clone()));
        }
        if pending.contains_key(&request_id) {
            return Err(SessionError::DuplicateRequest(request_id));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(
            request_id,
            PendingEntry {
                method: method.to_string(),
                responder: tx,
            },
        );
        Ok(rx)
    }

    /// Drop the waiter for `request_id` without answering it.
    pub fn cancel_pending(&self, request_id: &RequestId) -> bool {
        lock(&self.pending).remove(request_id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Hand a response to the caller waiting on its id.
    ///
    /// Returns `false` when nobody was waiting.
    pub fn resolve_response(&self, response: Message) -> bool {
        let Some(request_id) = response.id.clone() else {
            return false;
        };
        let entry = lock(&self.pending).remove(&request_id);
        match entry {
            Some(entry) => {
                debug!(
                    "Session {} resolved {} response for request {}",
                    self.id, entry.method, request_id
                );
                entry.responder.send(response).is_ok()
            }
            None => {
                debug!(
                    "Session {} received response for unknown request {}",
                    self.id, request_id
                );
                false
            }
        }
    }

    /// Queue a message for the transport.
    pub async fn send(&self, message: Message) -> Result<(), SessionError> {
        let sender = lock(&self.outbound)
            .clone()
            .ok_or_else(|| SessionError::Closed(self.id.clone()))?;
        sender
            .send(message)
            .await
            .map_err(|_| SessionError::Disconnected(self.id.clone()))
    }

    /// Release every resource held by the session.
    ///
    /// Pending waiters observe a closed channel, the outbound sender is
    /// dropped and the rate limiters are discarded. Returns `false` if the
    /// session was already closed.
    pub fn close(&self) -> bool {
        let released = {
            let mut pending = lock(&self.pending);
            let mut status = lock(&self.status);
            if *status == SessionStatus::Closed {
                return false;
            }
            *status = SessionStatus::Closed;
            std::mem::take(&mut *pending)
        };

        lock(&self.outbound).take();
        self.with_state(|state| state.limiters = None);

        if !released.is_empty() {
            debug!(
                "Session {} closed with {} pending request(s)",
                self.id,
                released.len()
            );
        }
        true
    }
}
