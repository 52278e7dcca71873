//! Agent-task execution: command parsing, the executor state machine and
//! the in-memory task store.

pub mod command;
pub mod executor;
pub mod store;

pub use command::{parse_commands, parse_message, Command, CommandParseError, ErrorSpec, RespondKind};
pub use executor::{ExecutorConfig, ExecutorError, TaskExecutor, TaskOutcome, TaskUpdate};
pub use store::TaskStore;
