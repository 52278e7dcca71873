//! A2A (agent-task protocol) payload types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Enums
// ============================================================================

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    /// Soft terminal: ends one invocation, resumes on new input.
    InputRequired,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    /// Hard terminal states never resume.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// Whether a status in this state closes the update stream.
    pub fn is_final(&self) -> bool {
        self.is_terminal() || *self == TaskState::InputRequired
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::InputRequired => "input-required",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

// ============================================================================
// Message & Parts
// ============================================================================

/// File payload; either inline base64 `bytes` or a `uri`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    File { file: FileContent },
    Data { data: Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single conversational turn attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl TaskMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
            metadata: None,
        }
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            parts: vec![Part::text(text)],
            metadata: None,
        }
    }

    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(Part::as_text)
    }
}

// ============================================================================
// Task Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<TaskMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl TaskStatus {
    /// Status stamped with the current time.
    pub fn now(state: TaskState, message: Option<TaskMessage>) -> Self {
        Self {
            state,
            message,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// One chunk of a named, indexed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parts: Vec<Part>,
    pub index: u32,
    #[serde(default)]
    pub append: bool,
    #[serde(default)]
    pub last_chunk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Artifact {
    /// A complete single-chunk artifact.
    pub fn whole(name: impl Into<String>, index: u32, parts: Vec<Part>) -> Self {
        Self {
            name: Some(name.into()),
            description: None,
            parts,
            index,
            append: false,
            last_chunk: true,
            metadata: None,
        }
    }
}

/// Task metadata. Original request headers are stored by the transport as a
/// plain string map under `headers`; any other keys are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub history: Vec<TaskMessage>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session_id: None,
            status: TaskStatus::now(TaskState::Submitted, None),
            history: Vec::new(),
            artifacts: Vec::new(),
            metadata: TaskMetadata::default(),
        }
    }

    /// First artifact index not yet used by this task.
    pub fn next_artifact_index(&self) -> u32 {
        self.artifacts
            .iter()
            .map(|a| a.index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Copy of the task with history trimmed to the last `length` entries.
    pub fn with_history_length(&self, length: Option<usize>) -> Task {
        let mut task = self.clone();
        if let Some(length) = length {
            let skip = task.history.len().saturating_sub(length);
            task.history.drain(..skip);
        }
        task
    }
}

// ============================================================================
// Method params & streaming events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSendParams {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub message: TaskMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueryParams {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIdParams {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusUpdateEvent {
    pub id: String,
    pub status: TaskStatus,
    #[serde(rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskArtifactUpdateEvent {
    pub id: String,
    pub artifact: Artifact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_serializes_kebab_case() {
        let json = serde_json::to_string(&TaskState::InputRequired).unwrap();
        assert_eq!(json, r#""input-required""#);
        assert_eq!(TaskState::InputRequired.to_string(), "input-required");
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(!TaskState::InputRequired.is_terminal());
        assert!(TaskState::InputRequired.is_final());
        assert!(!TaskState::Working.is_final());
    }

    #[test]
    fn test_part_tagging() {
        let part: Part = serde_json::from_str(r#"{"type":"data","data":{"a":1}}"#).unwrap();
        assert_eq!(
            part,
            Part::Data {
                data: serde_json::json!({"a": 1})
            }
        );
        let text = serde_json::to_value(Part::text("hi")).unwrap();
        assert_eq!(text, serde_json::json!({"type": "text", "text": "hi"}));
    }

    #[test]
    fn test_metadata_keeps_headers_and_extra_keys() {
        let metadata: TaskMetadata = serde_json::from_value(serde_json::json!({
            "headers": {"x-request-id": "abc"},
            "tenant": "acme"
        }))
        .unwrap();
        assert_eq!(metadata.headers.unwrap()["x-request-id"], "abc");
        assert_eq!(metadata.extra["tenant"], "acme");
    }

    #[test]
    fn test_next_artifact_index() {
        let mut task = Task::new("t1");
        assert_eq!(task.next_artifact_index(), 0);
        task.artifacts.push(Artifact::whole("a", 0, vec![Part::text("x")]));
        task.artifacts.push(Artifact::whole("b", 3, vec![Part::text("y")]));
        assert_eq!(task.next_artifact_index(), 4);
    }

    #[test]
    fn test_history_length_trims_oldest() {
        let mut task = Task::new("t1");
        for i in 0..5 {
            task.history.push(TaskMessage::user_text(format!("m{}", i)));
        }
        let trimmed = task.with_history_length(Some(2));
        assert_eq!(trimmed.history.len(), 2);
        assert_eq!(trimmed.history[0], TaskMessage::user_text("m3"));
        assert_eq!(task.with_history_length(None).history.len(), 5);
    }

    #[test]
    fn test_status_event_final_field_name() {
        let event = TaskStatusUpdateEvent {
            id: "t1".to_string(),
            status: TaskStatus {
                state: TaskState::Completed,
                message: None,
                timestamp: None,
            },
            is_final: true,
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["final"], true);
        assert_eq!(json["status"]["state"], "completed");
    }
}
