//! Task execution backends.

use crate::core::{Agent, AgentId, Task, TaskId};
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// What a finished task produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub summary: String,
}

impl TaskOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
        }
    }
}

/// Runs one task on one agent.
///
/// Implementations never touch orchestration state; the returned future
/// reports its outcome and the runtime applies it.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: Task, agent: Agent) -> BoxFuture<'static, Result<TaskOutput>>;
}

/// Deterministic executor for dry runs and tests.
///
/// Each task takes `tick × max(effort, 1)` and fails the number of times
/// set with [`ScriptedExecutor::fail_times`] before succeeding.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    tick: Duration,
    failures: Mutex<HashMap<TaskId, u32>>,
    calls: Mutex<Vec<(TaskId, AgentId)>>,
}

impl ScriptedExecutor {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    pub fn fail_times(self, task_id: impl Into<TaskId>, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.into(), times);
        self
    }

    /// Every execution started so far, in order.
    pub fn calls(&self) -> Vec<(TaskId, AgentId)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of executions started for `task_id`.
    pub fn attempts(&self, task_id: &TaskId) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(id, _)| id == task_id)
            .count()
    }
}

impl TaskExecutor for ScriptedExecutor {
    fn execute(&self, task: Task, agent: Agent) -> BoxFuture<'static, Result<TaskOutput>> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((task.id.clone(), agent.id.clone()));

        let fail = {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            match failures.get_mut(&task.id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        let duration = self.tick * task.estimated_effort.max(1);

        async move {
            tokio::time::sleep(duration).await;
            if fail {
                Err(Error::ExecutionFailure {
                    task_id: task.id,
                    error: format!("scripted failure on {}", agent.id),
                })
            } else {
                Ok(TaskOutput::new(format!(
                    "{} completed by {}",
                    task.title, agent.name
                )))
            }
        }
        .boxed()
    }
}
