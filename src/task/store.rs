//! In-memory task store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::executor::{ExecutorError, TaskOutcome, TaskUpdate};
use crate::protocol::a2a::{Task, TaskMessage, TaskMetadata, TaskSendParams, TaskState, TaskStatus};
use crate::protocol::GatewayError;

/// Default history entries kept per task
pub const DEFAULT_MAX_HISTORY: usize = 100;

struct TaskEntry {
    task: Task,
    /// Set while an invocation is running.
    cancel: Option<CancellationToken>,
}

pub struct TaskStore {
    entries: Mutex<HashMap<String, TaskEntry>>,
    max_history: usize,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl TaskStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_history: max_history.max(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a `tasks/send` message and start a new invocation.
    ///
    /// New tasks are created in `Submitted`; tasks waiting for input are
    /// resumed. Hard-terminal tasks and tasks with a running invocation are
    /// refused. `headers` is the transport context of the sending session.
    pub fn upsert_for_send(
        &self,
        params: &TaskSendParams,
        headers: &HashMap<String, String>,
    ) -> Result<(Task, CancellationToken), GatewayError> {
        let mut entries = self.entries();
        let cancel = CancellationToken::new();

        match entries.get_mut(&params.id) {
            Some(entry) => {
                let state = entry.task.status.state;
                if state.is_terminal() {
                    return Err(GatewayError::InvalidRequest(format!(
                        "Task {} is {} and cannot be resumed",
                        params.id, state
                    )));
                }
                if entry.cancel.is_some() {
                    return Err(GatewayError::InvalidRequest(format!(
                        "Task {} is already running",
                        params.id
                    )));
                }
                debug!("Resuming task {} from {}", params.id, state);
                entry.task.history.push(params.message.clone());
                trim_history(&mut entry.task.history, self.max_history);
                if params.session_id.is_some() {
                    entry.task.session_id = params.session_id.clone();
                }
                entry.cancel = Some(cancel.clone());
                Ok((entry.task.clone(), cancel))
            }
            None => {
                let mut task = Task::new(params.id.clone());
                task.session_id = params.session_id.clone();
                task.metadata = build_metadata(params.metadata.as_ref(), headers)?;
                task.history.push(params.message.clone());

                entries.insert(
                    params.id.clone(),
                    TaskEntry {
                        task: task.clone(),
                        cancel: Some(cancel.clone()),
                    },
                );
                debug!("Created task {}", params.id);
                Ok((task, cancel))
            }
        }
    }

    /// Fold one executor update into the stored task.
    ///
    /// Updates that arrive after the task reached a hard-terminal state are
    /// dropped.
    pub fn apply_update(&self, task_id: &str, update: &TaskUpdate) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(task_id) else {
            warn!("Dropping update for unknown task {}", task_id);
            return;
        };
        let task = &mut entry.task;
        if task.status.state.is_terminal() {
            debug!("Dropping {} update for finished task {}", update.kind(), task_id);
            return;
        }

        match update {
            TaskUpdate::Status(event) => {
                task.status = event.status.clone();
                if event.status.state != TaskState::Working {
                    if let Some(message) = &event.status.message {
                        task.history.push(message.clone());
                        trim_history(&mut task.history, self.max_history);
                    }
                }
            }
            TaskUpdate::Artifact(event) => {
                let chunk = &event.artifact;
                let existing = task
                    .artifacts
                    .iter_mut()
                    .find(|artifact| artifact.index == chunk.index);
                match existing {
                    Some(artifact) if chunk.append => {
                        artifact.parts.extend(chunk.parts.iter().cloned());
                        artifact.last_chunk = chunk.last_chunk;
                    }
                    Some(artifact) => *artifact = chunk.clone(),
                    None => task.artifacts.push(chunk.clone()),
                }
            }
            TaskUpdate::Error(error) => {
                task.status = TaskStatus::now(
                    TaskState::Failed,
                    Some(TaskMessage::agent_text(error.message.clone())),
                );
            }
        }
    }

    /// Close out an invocation once the executor has returned.
    pub fn finish(&self, task_id: &str, result: &Result<TaskOutcome, ExecutorError>) -> Option<Task> {
        let mut entries = self.entries();
        let entry = entries.get_mut(task_id)?;
        entry.cancel = None;

        let task = &mut entry.task;
        if !task.status.state.is_terminal() {
            match result {
                Ok(TaskOutcome::Completed) if task.status.state != TaskState::Completed => {
                    task.status = TaskStatus::now(TaskState::Completed, None);
                }
                Ok(_) => {}
                Err(ExecutorError::Cancelled) | Err(ExecutorError::ConsumerGone) => {
                    task.status = TaskStatus::now(TaskState::Canceled, None);
                }
                Err(e) => {
                    task.status = TaskStatus::now(
                        TaskState::Failed,
                        Some(TaskMessage::agent_text(e.to_string())),
                    );
                }
            }
        }
        Some(task.clone())
    }

    pub fn get(&self, task_id: &str, history_length: Option<usize>) -> Result<Task, GatewayError> {
        self.entries()
            .get(task_id)
            .map(|entry| entry.task.with_history_length(history_length))
            .ok_or_else(|| GatewayError::TaskNotFound(task_id.to_string()))
    }

    /// Cancel a task. Any running invocation is signalled to stop.
    pub fn cancel(&self, task_id: &str) -> Result<Task, GatewayError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| GatewayError::TaskNotFound(task_id.to_string()))?;

        if entry.task.status.state.is_terminal() {
            return Err(GatewayError::TaskNotCancelable(task_id.to_string()));
        }
        if let Some(token) = &entry.cancel {
            token.cancel();
        }
        entry.task.status = TaskStatus::now(TaskState::Canceled, None);
        debug!("Canceled task {}", task_id);
        Ok(entry.task.clone())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

fn trim_history(history: &mut Vec<TaskMessage>, max: usize) {
    if history.len() > max {
        let excess = history.len() - max;
        history.drain(..excess);
    }
}

/// Client metadata plus the transport headers. Transport headers win over
/// client-supplied ones with the same name.
fn build_metadata(
    supplied: Option<&serde_json::Map<String, Value>>,
    headers: &HashMap<String, String>,
) -> Result<TaskMetadata, GatewayError> {
    let mut metadata = match supplied {
        Some(map) => serde_json::from_value::<TaskMetadata>(Value::Object(map.clone()))
            .map_err(|e| GatewayError::InvalidParams(format!("invalid task metadata: {}", e)))?,
        None => TaskMetadata::default(),
    };

    if !headers.is_empty() {
        let merged = metadata.headers.get_or_insert_with(BTreeMap::new);
        for (name, value) in headers {
            merged.insert(name.clone(), value.clone());
        }
    }
    Ok(metadata)
}
