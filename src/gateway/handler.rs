//! Inbound message dispatch.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::ToolContext;
use super::Gateway;
use crate::metrics;
use crate::protocol::a2a::{
    Task, TaskIdParams, TaskQueryParams, TaskSendParams, TaskState, TaskStatus,
    TaskStatusUpdateEvent,
};
use crate::protocol::mcp::{
    Completion, CompletionResult, EmptyResult, InitializeParams, InitializeResult,
    PaginatedParams, PromptsCapability, PromptsGetParams, PromptsListResult,
    ResourceTemplatesListResult, ResourcesCapability, ResourcesListResult, ResourcesReadParams,
    ServerCapabilities, ServerInfo, SetLevelParams, TasksCapability, ToolsCallParams,
    ToolsCapability, ToolsListResult, MCP_PROTOCOL_VERSION,
};
use crate::protocol::{methods, GatewayError, Message, RequestId};
use crate::session::{Session, SessionStatus};
use crate::task::{ExecutorError, TaskOutcome, TaskUpdate};

/// Buffered updates between the executor and the store/subscriber
const TASK_UPDATE_BUFFER: usize = 32;

/// Levels accepted by `logging/setLevel`
const LOG_LEVELS: &[&str] = &[
    "debug",
    "info",
    "notice",
    "warning",
    "error",
    "critical",
    "alert",
    "emergency",
];

impl Gateway {
    /// Handle one inbound message for `session_id`.
    ///
    /// Returns the reply to send back, if any. Rejected requests get an
    /// error reply and leave the session open; rejected notifications are
    /// only counted. Responses are routed to the
    /// caller waiting on their id; notifications get no reply.
    pub async fn handle_message(&self, session_id: &str, mut message: Message) -> Option<Message> {
        let session = match self.sessions.get_session(session_id).await {
            Ok(session) => session,
            Err(e) => {
                debug!("Dropping message for {}: {}", session_id, e);
                return message
                    .is_request()
                    .then(|| Message::error(message.id.clone(), GatewayError::InvalidRequest(e.to_string())));
            }
        };
        session.touch();

        if let Err(rejection) = self.pipeline.validate(&session, &message) {
            metrics::record_rejection(rejection.reason());
            let Some(id) = message.id.clone() else {
                debug!(
                    "Session {} rejected notification {}: {}",
                    session.id(),
                    message.method_name(),
                    rejection.reason()
                );
                return None;
            };
            return Some(Message::error(Some(id), rejection.into()));
        }
        message.mark_processed();

        if message.method.is_none() {
            if !session.resolve_response(message) {
                debug!("Session {} had nobody waiting for a response", session.id());
            }
            return None;
        }

        if message.is_notification() {
            self.handle_notification(&session, &message);
            return None;
        }

        let request_id = message.id.clone()?;
        match self.dispatch(&session, &request_id, message).await {
            Ok(Some(result)) => Some(Message::success(request_id, result)),
            Ok(None) => None,
            Err(error) => {
                debug!(
                    "Session {} request {} failed: {}",
                    session.id(),
                    request_id,
                    error
                );
                Some(Message::error(Some(request_id), error))
            }
        }
    }

    fn handle_notification(&self, session: &Session, message: &Message) {
        match message.method_name() {
            methods::INITIALIZED => {
                if let Err(e) = session.mark_connected() {
                    debug!("Ignoring initialized notification: {}", e);
                }
            }
            methods::ROOTS_LIST_CHANGED => {
                debug!("Session {} reported a roots change", session.id());
            }
            other => debug!("Session {} sent notification {}", session.id(), other),
        }
    }

    /// `Ok(None)` means the reply is delivered asynchronously.
    async fn dispatch(
        &self,
        session: &Arc<Session>,
        request_id: &RequestId,
        message: Message,
    ) -> Result<Option<Value>, GatewayError> {
        let method = message.method_name().to_string();
        let params = message.params;

        if methods::is_task_method(&method) {
            if !self.settings.tasks_enabled {
                return Err(GatewayError::MethodNotFound(method));
            }
            if session.status() == SessionStatus::Connecting {
                session
                    .mark_connected()
                    .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
            }
            return match method.as_str() {
                methods::TASKS_SEND => self.handle_tasks_send(session, params).await.map(Some),
                methods::TASKS_SEND_SUBSCRIBE => self
                    .handle_tasks_send_subscribe(session, request_id, params)
                    .map(|()| None),
                methods::TASKS_GET => self.handle_tasks_get(params).map(Some),
                methods::TASKS_CANCEL => self.handle_tasks_cancel(params).map(Some),
                _ => Err(GatewayError::MethodNotFound(method)),
            };
        }

        match method.as_str() {
            methods::INITIALIZE => return self.handle_initialize(session, params).map(Some),
            methods::PING => return to_result(&EmptyResult {}).map(Some),
            _ => {}
        }

        if session.status() != SessionStatus::Connected {
            return Err(GatewayError::InvalidRequest(
                "Session not initialized".to_string(),
            ));
        }

        let result = match method.as_str() {
            methods::TOOLS_LIST | methods::TOOLS_CALL if !self.settings.tools_enabled => {
                Err(GatewayError::MethodNotFound(method.clone()))
            }
            methods::TOOLS_LIST => self.handle_tools_list(params),
            methods::TOOLS_CALL => self.handle_tools_call(session, params).await,
            methods::PROMPTS_LIST => to_result(&PromptsListResult {
                prompts: Vec::new(),
                next_cursor: None,
            }),
            methods::PROMPTS_GET => {
                let params: PromptsGetParams = parse_params(params)?;
                Err(GatewayError::ResourceNotFound(format!("prompt {}", params.name)))
            }
            methods::RESOURCES_LIST => to_result(&ResourcesListResult {
                resources: Vec::new(),
                next_cursor: None,
            }),
            methods::RESOURCES_TEMPLATES_LIST => to_result(&ResourceTemplatesListResult {
                resource_templates: Vec::new(),
                next_cursor: None,
            }),
            methods::RESOURCES_READ => {
                let params: ResourcesReadParams = parse_params(params)?;
                Err(GatewayError::ResourceNotFound(params.uri))
            }
            methods::RESOURCES_SUBSCRIBE | methods::RESOURCES_UNSUBSCRIBE => {
                to_result(&EmptyResult {})
            }
            methods::COMPLETION_COMPLETE => to_result(&CompletionResult {
                completion: Completion {
                    values: Vec::new(),
                    total: 0,
                    has_more: false,
                },
            }),
            methods::LOGGING_SET_LEVEL => self.handle_set_level(session, params),
            _ => Err(GatewayError::MethodNotFound(method.clone())),
        };
        result.map(Some)
    }

    // ========================================================================
    // Tool protocol
    // ========================================================================

    fn handle_initialize(
        &self,
        session: &Session,
        params: Option<Value>,
    ) -> Result<Value, GatewayError> {
        if let Some(params) = params {
            let params: InitializeParams = serde_json::from_value(params)
                .map_err(|e| GatewayError::InvalidParams(e.to_string()))?;
            info!(
                "Session {} initializing: {} {} (protocol {})",
                session.id(),
                params.client_info.name,
                params.client_info.version,
                params.protocol_version
            );
        }

        session
            .mark_connected()
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: self.settings.tools_enabled.then_some(ToolsCapability {
                    list_changed: Some(false),
                }),
                resources: Some(ResourcesCapability {
                    subscribe: Some(false),
                    list_changed: None,
                }),
                prompts: Some(PromptsCapability { list_changed: None }),
                logging: Some(serde_json::json!({})),
                tasks: self
                    .settings
                    .tasks_enabled
                    .then_some(TasksCapability { streaming: true }),
            },
            server_info: ServerInfo {
                name: self.settings.server_name.clone(),
                version: self.settings.server_version.clone(),
            },
        };
        to_result(&result)
    }

    fn handle_tools_list(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let params: PaginatedParams = parse_optional_params(params)?;
        let offset = match params.cursor.as_deref() {
            None | Some("") => 0,
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| GatewayError::InvalidParams(format!("Invalid cursor: {}", cursor)))?,
        };

        let (tools, next) = self.tools.list_page(offset, self.settings.tools_page_size);
        to_result(&ToolsListResult {
            tools,
            next_cursor: next.map(|offset| offset.to_string()),
        })
    }

    async fn handle_tools_call(
        &self,
        session: &Session,
        params: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let params: ToolsCallParams = parse_params(params)?;
        let tool = self
            .tools
            .get_tool(&params.name)
            .ok_or_else(|| GatewayError::InvalidParams(format!("Unknown tool: {}", params.name)))?;

        let ctx = ToolContext {
            session_id: session.id().to_string(),
            owner_id: session.owner_id().to_string(),
            headers: session.context().clone(),
            sessions: self.sessions.clone(),
            tasks: self.tasks.clone(),
            tool_count: self.tools.tool_count(),
            server_version: self.settings.server_version.clone(),
            start_time: self.start_time,
        };

        debug!("Session {} calling tool {}", session.id(), params.name);
        let arguments = params.arguments.unwrap_or_else(|| serde_json::json!({}));
        let result = (tool.handler)(ctx, arguments).await?;
        to_result(&result)
    }

    fn handle_set_level(&self, session: &Session, params: Option<Value>) -> Result<Value, GatewayError> {
        let params: SetLevelParams = parse_params(params)?;
        if !LOG_LEVELS.contains(&params.level.as_str()) {
            return Err(GatewayError::InvalidParams(format!(
                "Unknown log level: {}",
                params.level
            )));
        }
        debug!("Session {} log level set to {}", session.id(), params.level);
        session.with_state(|state| state.log_level = Some(params.level));
        to_result(&EmptyResult {})
    }

    // ========================================================================
    // Agent-task protocol
    // ========================================================================

    async fn handle_tasks_send(
        &self,
        session: &Session,
        params: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let params: TaskSendParams = parse_params(params)?;
        let (task, cancel) = self.tasks.upsert_for_send(&params, session.context())?;

        match self.run_task(task, cancel, None).await {
            Err(ExecutorError::Rpc(error)) => Err(error.into()),
            Err(ExecutorError::Internal(reason)) => Err(GatewayError::InternalError(reason)),
            _ => to_result(&self.tasks.get(&params.id, params.history_length)?),
        }
    }

    fn handle_tasks_send_subscribe(
        &self,
        session: &Arc<Session>,
        request_id: &RequestId,
        params: Option<Value>,
    ) -> Result<(), GatewayError> {
        let params: TaskSendParams = parse_params(params)?;
        let (task, cancel) = self.tasks.upsert_for_send(&params, session.context())?;

        let gateway = self.clone();
        let session = session.clone();
        let request_id = request_id.clone();
        tokio::spawn(async move {
            let task_id = task.id.clone();
            let result = gateway
                .run_task(task, cancel, Some((&session, &request_id)))
                .await;

            // The executor goes quiet on cancellation; close the stream here.
            if result == Err(ExecutorError::Cancelled) {
                let closing = TaskUpdate::Status(TaskStatusUpdateEvent {
                    id: task_id,
                    status: TaskStatus::now(TaskState::Canceled, None),
                    is_final: true,
                });
                if let Err(e) = session.send(update_message(&request_id, &closing)).await {
                    debug!("Could not deliver cancellation to {}: {}", session.id(), e);
                }
            }
        });
        Ok(())
    }

    fn handle_tasks_get(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let params: TaskQueryParams = parse_params(params)?;
        to_result(&self.tasks.get(&params.id, params.history_length)?)
    }

    fn handle_tasks_cancel(&self, params: Option<Value>) -> Result<Value, GatewayError> {
        let params: TaskIdParams = parse_params(params)?;
        to_result(&self.tasks.cancel(&params.id)?)
    }

    /// Run one invocation, folding every update into the store and, for
    /// subscriptions, forwarding it to the subscriber in emission order.
    async fn run_task(
        &self,
        task: Task,
        cancel: CancellationToken,
        subscriber: Option<(&Arc<Session>, &RequestId)>,
    ) -> Result<TaskOutcome, ExecutorError> {
        let task_id = task.id.clone();
        let (tx, mut rx) = mpsc::channel(TASK_UPDATE_BUFFER);

        let producer = self.executor.execute(&task, tx, cancel.clone());
        let consumer = async {
            while let Some(update) = rx.recv().await {
                self.tasks.apply_update(&task_id, &update);
                if let Some((session, request_id)) = subscriber {
                    if let Err(e) = session.send(update_message(request_id, &update)).await {
                        warn!("Subscriber for task {} went away: {}", task_id, e);
                        cancel.cancel();
                        break;
                    }
                }
            }
        };
        let (result, ()) = tokio::join!(producer, consumer);

        self.tasks.finish(&task_id, &result);
        metrics::record_task_outcome(outcome_label(&result));
        debug!("Task {} invocation ended: {:?}", task_id, result);
        result
    }
}

/// Wire form of one task update, answering `request_id`.
fn update_message(request_id: &RequestId, update: &TaskUpdate) -> Message {
    let value = match update {
        TaskUpdate::Status(event) => serde_json::to_value(event),
        TaskUpdate::Artifact(event) => serde_json::to_value(event),
        TaskUpdate::Error(error) => {
            return Message::error_response(Some(request_id.clone()), error.clone());
        }
    };
    match value {
        Ok(value) => Message::success(request_id.clone(), value),
        Err(e) => Message::error(
            Some(request_id.clone()),
            GatewayError::InternalError(e.to_string()),
        ),
    }
}

fn outcome_label(result: &Result<TaskOutcome, ExecutorError>) -> &'static str {
    match result {
        Ok(TaskOutcome::Completed) => "completed",
        Ok(TaskOutcome::InputRequired) => "input_required",
        Err(ExecutorError::Cancelled) => "canceled",
        Err(ExecutorError::Rpc(_)) => "rpc_error",
        Err(ExecutorError::Internal(_)) => "failed",
        Err(ExecutorError::ConsumerGone) => "abandoned",
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, GatewayError> {
    let params = params.ok_or_else(|| GatewayError::InvalidParams("Missing params".to_string()))?;
    serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))
}

fn parse_optional_params<T: DeserializeOwned + Default>(
    params: Option<Value>,
) -> Result<T, GatewayError> {
    match params {
        Some(Value::Null) | None => Ok(T::default()),
        Some(params) => {
            serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))
        }
    }
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::InternalError(e.to_string()))
}
