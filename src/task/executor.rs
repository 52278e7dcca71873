//! Agent-task executor.
//!
//! Drives one invocation of a task from its latest history entry to a
//! terminal or soft-terminal state, emitting updates over a channel owned by
//! the invocation. The channel closes when the executor returns.

use std::time::Duration;

use base64::Engine;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::{parse_message, Command, ErrorSpec, RespondKind};
use crate::metrics;
use crate::protocol::a2a::{
    Artifact, FileContent, Part, Task, TaskArtifactUpdateEvent, TaskMessage, TaskState,
    TaskStatus, TaskStatusUpdateEvent,
};
use crate::protocol::RpcError;

/// Delay between chunks produced by `stream`
pub const DEFAULT_STREAM_CHUNK_DELAY: Duration = Duration::from_millis(100);

/// Characters of the triggering text echoed in the default artifact
const DEFAULT_ARTIFACT_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub stream_chunk_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stream_chunk_delay: DEFAULT_STREAM_CHUNK_DELAY,
        }
    }
}

/// One item of a task's update stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    Status(TaskStatusUpdateEvent),
    Artifact(TaskArtifactUpdateEvent),
    /// Protocol-level error requested by the task. Always the last update.
    Error(RpcError),
}

impl TaskUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskUpdate::Status(_) => "status",
            TaskUpdate::Artifact(_) => "artifact",
            TaskUpdate::Error(_) => "error",
        }
    }

    /// Whether this update concludes the invocation.
    pub fn is_final(&self) -> bool {
        match self {
            TaskUpdate::Status(event) => event.is_final,
            TaskUpdate::Artifact(_) => false,
            TaskUpdate::Error(_) => true,
        }
    }
}

/// How an invocation ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    InputRequired,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
    #[error("task invocation was cancelled")]
    Cancelled,

    #[error("task returned error {0}")]
    Rpc(RpcError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("update consumer went away")]
    ConsumerGone,
}

/// Sends updates for one invocation, honouring cancellation at every send
/// and sleep.
struct Emitter<'a> {
    task_id: &'a str,
    updates: mpsc::Sender<TaskUpdate>,
    cancel: CancellationToken,
}

impl Emitter<'_> {
    fn check(&self) -> Result<(), ExecutorError> {
        if self.cancel.is_cancelled() {
            Err(ExecutorError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn emit(&self, update: TaskUpdate) -> Result<(), ExecutorError> {
        self.check()?;
        let kind = update.kind();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExecutorError::Cancelled),
            sent = self.updates.send(update) => {
                sent.map_err(|_| ExecutorError::ConsumerGone)?;
                metrics::record_task_update(kind);
                Ok(())
            }
        }
    }

    async fn status(
        &self,
        state: TaskState,
        message: Option<TaskMessage>,
        is_final: bool,
    ) -> Result<(), ExecutorError> {
        self.emit(TaskUpdate::Status(TaskStatusUpdateEvent {
            id: self.task_id.to_string(),
            status: TaskStatus::now(state, message),
            is_final,
        }))
        .await
    }

    async fn artifact(&self, artifact: Artifact) -> Result<(), ExecutorError> {
        self.emit(TaskUpdate::Artifact(TaskArtifactUpdateEvent {
            id: self.task_id.to_string(),
            artifact,
        }))
        .await
    }

    /// Emit `Failed` and return the matching internal error.
    async fn fail(&self, reason: String) -> Result<TaskOutcome, ExecutorError> {
        warn!("Task {} failed: {}", self.task_id, reason);
        self.status(TaskState::Failed, Some(TaskMessage::agent_text(reason.clone())), true)
            .await?;
        Err(ExecutorError::Internal(reason))
    }

    async fn sleep(&self, duration: Duration) -> Result<(), ExecutorError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExecutorError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

pub struct TaskExecutor {
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run one invocation of `task`.
    ///
    /// After cancellation nothing more is sent and `Cancelled` is returned;
    /// callers record the task as canceled rather than failed.
    pub async fn execute(
        &self,
        task: &Task,
        updates: mpsc::Sender<TaskUpdate>,
        cancel: CancellationToken,
    ) -> Result<TaskOutcome, ExecutorError> {
        let emitter = Emitter {
            task_id: &task.id,
            updates,
            cancel,
        };

        emitter
            .status(
                TaskState::Working,
                Some(TaskMessage::agent_text("Parsing task commands")),
                false,
            )
            .await?;

        let Some(trigger) = task.history.last() else {
            return emitter.fail("task has no messages to execute".to_string()).await;
        };

        let commands = parse_message(trigger);
        debug!("Task {} parsed {} command(s)", task.id, commands.len());

        let mut buffered: Vec<Artifact> = Vec::new();
        let mut next_index = task.next_artifact_index();
        let mut pending_delay: Option<Duration> = None;

        for command in commands {
            emitter.check()?;
            if let Some(delay) = pending_delay.take() {
                emitter.sleep(delay).await?;
            }

            match command {
                Command::Wait(delay) => pending_delay = Some(delay),
                Command::Respond { kind, payload } => {
                    let part = match build_part(kind, &payload) {
                        Ok(part) => part,
                        Err(reason) => return emitter.fail(reason).await,
                    };
                    buffered.push(Artifact::whole("response", next_index, vec![part]));
                    next_index += 1;
                }
                Command::Ask(prompt) => {
                    emitter
                        .status(
                            TaskState::InputRequired,
                            Some(TaskMessage::agent_text(prompt)),
                            true,
                        )
                        .await?;
                    return Ok(TaskOutcome::InputRequired);
                }
                Command::Stream(count) => {
                    self.stream_chunks(&emitter, next_index, count).await?;
                    emitter.status(TaskState::Completed, None, true).await?;
                    return Ok(TaskOutcome::Completed);
                }
                Command::Error(ErrorSpec::Code(code)) => {
                    let error = RpcError::new(code, format!("Task requested error {}", code));
                    emitter.emit(TaskUpdate::Error(error.clone())).await?;
                    return Err(ExecutorError::Rpc(error));
                }
                Command::Error(ErrorSpec::Fail) => {
                    return emitter.fail("task requested failure".to_string()).await;
                }
                Command::GetHeaders => match &task.metadata.headers {
                    Some(headers) => {
                        let data = serde_json::to_value(headers)
                            .map_err(|e| ExecutorError::Internal(e.to_string()))?;
                        buffered.push(Artifact::whole(
                            "headers",
                            next_index,
                            vec![Part::Data { data }],
                        ));
                        next_index += 1;
                    }
                    None => {
                        return emitter
                            .fail("task metadata carries no request headers".to_string())
                            .await;
                    }
                },
                Command::Unknown(name) => {
                    warn!("Task {} skipping unknown command {:?}", task.id, name);
                }
            }

            emitter.check()?;
        }

        if let Some(delay) = pending_delay.take() {
            emitter.sleep(delay).await?;
        }

        if buffered.is_empty() {
            buffered.push(default_artifact(trigger, next_index));
        }
        for artifact in buffered {
            emitter.artifact(artifact).await?;
        }
        emitter.status(TaskState::Completed, None, true).await?;

        info!("Task {} completed", task.id);
        Ok(TaskOutcome::Completed)
    }

    async fn stream_chunks(
        &self,
        emitter: &Emitter<'_>,
        index: u32,
        count: u32,
    ) -> Result<(), ExecutorError> {
        for chunk in 0..count {
            if chunk > 0 {
                emitter.sleep(self.config.stream_chunk_delay).await?;
            }
            emitter
                .artifact(Artifact {
                    name: Some("stream".to_string()),
                    description: None,
                    parts: vec![Part::text(format!("chunk {} of {}", chunk + 1, count))],
                    index,
                    append: chunk > 0,
                    last_chunk: chunk + 1 == count,
                    metadata: None,
                })
                .await?;
        }
        Ok(())
    }
}

fn build_part(kind: RespondKind, payload: &str) -> Result<Part, String> {
    match kind {
        RespondKind::Text => Ok(Part::text(payload)),
        RespondKind::File => Ok(Part::File {
            file: FileContent {
                name: Some("response.txt".to_string()),
                mime_type: Some("text/plain".to_string()),
                bytes: Some(base64::engine::general_purpose::STANDARD.encode(payload)),
                uri: None,
            },
        }),
        RespondKind::Data => serde_json::from_str::<Value>(payload)
            .map(|data| Part::Data { data })
            .map_err(|e| format!("invalid JSON payload for data response: {}", e)),
    }
}

/// `"OK"`, or `"OK: <preview>..."` when the trigger starts with text.
fn default_artifact(trigger: &TaskMessage, index: u32) -> Artifact {
    let text = match trigger.parts.first().and_then(Part::as_text) {
        Some(text) if !text.is_empty() => {
            let preview: String = text.chars().take(DEFAULT_ARTIFACT_PREVIEW_CHARS).collect();
            format!("OK: {}...", preview)
        }
        _ => "OK".to_string(),
    };
    Artifact::whole("response", index, vec![Part::text(text)])
}
