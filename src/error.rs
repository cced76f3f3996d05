use thiserror::Error;

use crate::core::{AgentId, TaskId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No capable agent for task {task_id}")]
    UnassignableTask { task_id: TaskId },

    #[error("Adaptation of task {task_id} would alter {field}")]
    AdaptationConflict { task_id: TaskId, field: String },

    #[error("Execution of task {task_id} failed: {error}")]
    ExecutionFailure { task_id: TaskId, error: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    #[error("Agent already registered: {0}")]
    DuplicateAgent(AgentId),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Stale planning cycle {cycle_id} (last applied: {last_applied})")]
    StaleCycle { cycle_id: u64, last_applied: u64 },

    #[error("Run cancelled")]
    Cancelled,

    #[error("No home directory")]
    NoHomeDir,

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Whether this error aborts a whole run rather than a single task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::Io(_)
                | Error::Json(_)
                | Error::TomlParse(_)
                | Error::NoHomeDir
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
