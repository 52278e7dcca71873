//! In-memory client for end-to-end tests
//!
//! Wraps the inbound sender and outbound receiver of one gateway session and
//! provides builders for the messages tests send most.
//!
//! When method names or payload shapes change, update only this file.

use super::constants::*;
use pezzottify_gateway::protocol::a2a::TaskMessage;
use pezzottify_gateway::protocol::mcp::MCP_PROTOCOL_VERSION;
use pezzottify_gateway::{Message, RequestId, Session};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Test client bound to a single gateway session
pub struct TestClient {
    /// The session on the gateway side (public for direct assertions)
    pub session: Arc<Session>,
    inbound: mpsc::Sender<Message>,
    outbound: mpsc::Receiver<Message>,
    loop_handle: JoinHandle<()>,
    next_id: AtomicI64,
}

impl TestClient {
    pub(super) fn new(
        session: Arc<Session>,
        inbound: mpsc::Sender<Message>,
        outbound: mpsc::Receiver<Message>,
        loop_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            session,
            inbound,
            outbound,
            loop_handle,
            next_id: AtomicI64::new(1),
        }
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // ========================================================================
    // Raw messaging
    // ========================================================================

    /// Queues a message for the session's dispatch loop
    pub async fn send(&self, message: Message) {
        self.inbound
            .send(message)
            .await
            .expect("Session loop is not running");
    }

    /// Waits for the next outbound message
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within `RECV_TIMEOUT` or the session closed.
    pub async fn recv(&mut self) -> Message {
        self.try_recv()
            .await
            .expect("Outbound channel closed before a message arrived")
    }

    /// Waits for the next outbound message, `None` once the session closed
    pub async fn try_recv(&mut self) -> Option<Message> {
        tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv())
            .await
            .expect("Timed out waiting for an outbound message")
    }

    /// Sends a request and waits for the message answering it
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Message {
        let id = self.next_id();
        self.send(Message::request(id.clone(), method, params)).await;
        let response = self.recv().await;
        assert_eq!(response.id, Some(id), "Response for a different request");
        response
    }

    /// Sends a request and collects responses for it until `is_last` holds
    pub async fn request_stream(
        &mut self,
        method: &str,
        params: Option<Value>,
        is_last: impl Fn(&Message) -> bool,
    ) -> Vec<Message> {
        let id = self.next_id();
        self.send(Message::request(id.clone(), method, params)).await;

        let mut messages = Vec::new();
        loop {
            let message = self.recv().await;
            assert_eq!(message.id.as_ref(), Some(&id));
            let done = is_last(&message);
            messages.push(message);
            if done {
                return messages;
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) {
        self.send(Message::notification(method, params)).await;
    }

    // ========================================================================
    // Tool protocol
    // ========================================================================

    pub async fn initialize(&mut self) -> Message {
        let response = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": TEST_CLIENT_NAME, "version": "1.0.0"}
                })),
            )
            .await;
        self.notify("notifications/initialized", None).await;
        response
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Message {
        self.request(
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        )
        .await
    }

    // ========================================================================
    // Agent-task protocol
    // ========================================================================

    pub fn task_params(task_id: &str, text: &str) -> Value {
        json!({
            "id": task_id,
            "message": TaskMessage::user_text(text),
        })
    }

    pub async fn send_task(&mut self, task_id: &str, text: &str) -> Message {
        self.request("tasks/send", Some(Self::task_params(task_id, text)))
            .await
    }

    /// Subscribes to a task and collects updates up to the final one
    pub async fn send_task_subscribe(&mut self, task_id: &str, text: &str) -> Vec<Message> {
        self.request_stream(
            "tasks/sendSubscribe",
            Some(Self::task_params(task_id, text)),
            is_final_update,
        )
        .await
    }

    pub async fn get_task(&mut self, task_id: &str) -> Message {
        self.request("tasks/get", Some(json!({"id": task_id}))).await
    }

    pub async fn cancel_task(&mut self, task_id: &str) -> Message {
        self.request("tasks/cancel", Some(json!({"id": task_id})))
            .await
    }

    /// Whether the dispatch loop for this session has exited
    pub fn loop_finished(&self) -> bool {
        self.loop_handle.is_finished()
    }
}

/// A streamed update closes the stream when it is an error or carries
/// `final: true`.
pub fn is_final_update(message: &Message) -> bool {
    message.error.is_some()
        || message
            .result
            .as_ref()
            .and_then(|result| result.get("final"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
}
