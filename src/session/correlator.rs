//! Client-side request/response correlation.
//!
//! Outbound requests are keyed by request id in the session's pending table.
//! The session is looked up through the registry on every call so a closed
//! session is never used through a stale reference.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, Stream};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::manager::SessionManager;
use super::state::{Session, SessionId};
use super::SessionError;
use crate::protocol::mcp::next_cursor;
use crate::protocol::{GatewayError, Message, RequestId};

/// Default time to wait for a single response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive result-less pages tolerated before pagination gives up
pub const DEFAULT_MAX_SKIPPED_PAGES: usize = 3;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    pub max_skipped_pages: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_skipped_pages: DEFAULT_MAX_SKIPPED_PAGES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CorrelatorError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("request {0} was cancelled before a response arrived")]
    Cancelled(RequestId),

    #[error("{method} request timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
}

/// Resolves to the response for one outbound request.
///
/// Dropping the handle before it resolves removes the pending entry.
pub struct ResponseHandle {
    request_id: RequestId,
    session: Arc<Session>,
    receiver: oneshot::Receiver<Message>,
}

impl ResponseHandle {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

impl Future for ResponseHandle {
    type Output = Result<Message, CorrelatorError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(message)) => Poll::Ready(Ok(message)),
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(CorrelatorError::Cancelled(this.request_id.clone())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        if self.session.cancel_pending(&self.request_id) {
            debug!(
                "Session {} dropped waiter for request {}",
                self.session.id(),
                self.request_id
            );
        }
    }
}

pub struct RequestCorrelator {
    manager: Arc<SessionManager>,
    session_id: SessionId,
    settings: ClientSettings,
}

impl RequestCorrelator {
    pub fn new(manager: Arc<SessionManager>, session_id: impl Into<SessionId>, settings: ClientSettings) -> Self {
        Self {
            manager,
            session_id: session_id.into(),
            settings,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Register a waiter, transmit the request and return without waiting
    /// for the response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<ResponseHandle, CorrelatorError> {
        let session = self.manager.get_session(&self.session_id).await?;
        let request_id = session.next_request_id();
        let receiver = session.register_pending(request_id.clone(), method)?;
        let handle = ResponseHandle {
            request_id: request_id.clone(),
            session: session.clone(),
            receiver,
        };

        session
            .send(Message::request(request_id, method, params))
            .await?;
        Ok(handle)
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Message, CorrelatorError> {
        let handle = self.send_request(method, params).await?;
        tokio::time::timeout(self.settings.request_timeout, handle)
            .await
            .map_err(|_| CorrelatorError::Timeout {
                method: method.to_string(),
                timeout: self.settings.request_timeout,
            })?
    }

    /// Walk a paginated list method, yielding every page's response.
    ///
    /// The stream ends when a page carries no `nextCursor`, after the first
    /// error (yielded as a message with `error` set), or when `cancel` fires.
    /// A response without a result is skipped and the same cursor is asked
    /// for again. After `max_skipped_pages` such responses in a row an
    /// internal error is yielded and the stream ends, so a truncated listing
    /// never looks complete.
    pub fn request_all_pages<'a>(
        &'a self,
        method: &'a str,
        params: Option<Value>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Message> + 'a {
        let state = PageState {
            cursor: None,
            skipped: 0,
            done: false,
        };

        stream::unfold(state, move |mut state| {
            let params = params.clone();
            let cancel = cancel.clone();
            async move {
                loop {
                    if state.done {
                        return None;
                    }

                    let page_params = with_cursor(params.clone(), state.cursor.as_deref());
                    let response = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!("Pagination of {} cancelled", method);
                            return None;
                        }
                        response = self.request(method, page_params) => response,
                    };

                    let message = match response {
                        Ok(message) => message,
                        Err(e) => {
                            state.done = true;
                            let error = Message::error(None, GatewayError::InternalError(e.to_string()));
                            return Some((error, state));
                        }
                    };

                    if message.error.is_some() {
                        state.done = true;
                        return Some((message, state));
                    }

                    match &message.result {
                        None | Some(Value::Null) => {
                            state.skipped += 1;
                            warn!(
                                "Skipping {} page without a result ({} in a row)",
                                method, state.skipped
                            );
                            if state.skipped >= self.settings.max_skipped_pages {
                                warn!("Giving up on {} after {} empty pages", method, state.skipped);
                                state.done = true;
                                let error = Message::error(
                                    None,
                                    GatewayError::InternalError(format!(
                                        "gave up on {} after {} pages without a result",
                                        method, state.skipped
                                    )),
                                );
                                return Some((error, state));
                            }
                        }
                        Some(result) => {
                            state.skipped = 0;
                            match next_cursor(result) {
                                Some(cursor) => state.cursor = Some(cursor),
                                None => state.done = true,
                            }
                            return Some((message, state));
                        }
                    }
                }
            }
        })
    }
}

struct PageState {
    cursor: Option<String>,
    skipped: usize,
    done: bool,
}

fn with_cursor(params: Option<Value>, cursor: Option<&str>) -> Option<Value> {
    let Some(cursor) = cursor else {
        return params;
    };
    let mut params = params.unwrap_or_else(|| Value::Object(Default::default()));
    if let Value::Object(map) = &mut params {
        map.insert("cursor".to_string(), Value::String(cursor.to_string()));
    }
    Some(params)
}
