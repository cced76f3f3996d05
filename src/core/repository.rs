//! Task repository: the backlog and every task's lifecycle state.
//!
//! The repository is owned by the single writer of a run. Planning reads
//! it; commits and execution outcomes mutate it through the methods below,
//! each of which validates the status transition it performs.

use crate::core::agent::AgentId;
use crate::core::dag::DependencyGraph;
use crate::core::task::{Task, TaskId, TaskSnapshot, TaskStatus};
use crate::error::{Error, Result};
use crate::{clog_debug, clog_warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Result of a completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// The task moved to Completed.
    Completed,
    /// The task was already completed; nothing changed.
    Duplicate,
}

/// Holds every task of a run in insertion order.
#[derive(Debug, Default)]
pub struct TaskRepository {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
    graph: DependencyGraph,
    completed: BTreeSet<TaskId>,
    outputs: HashMap<TaskId, String>,
    /// Each task as it entered the backlog, before any adaptation.
    originals: HashMap<TaskId, TaskSnapshot>,
}

impl TaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository from descriptor tasks.
    ///
    /// Dependencies may reference tasks later in the list; unknown ids
    /// and cycles are rejected.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self> {
        let graph = DependencyGraph::from_tasks(&tasks)?;
        let mut repo = Self {
            graph,
            ..Self::default()
        };
        for task in tasks {
            if repo.tasks.contains_key(&task.id) {
                return Err(Error::DuplicateTask(task.id));
            }
            repo.order.push(task.id.clone());
            repo.originals.insert(task.id.clone(), TaskSnapshot::from(&task));
            repo.tasks.insert(task.id.clone(), task);
        }
        Ok(repo)
    }

    /// Add a task to the backlog.
    ///
    /// All of its dependencies must already be present.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(Error::DuplicateTask(task.id));
        }
        if let Some(missing) = task.dependencies.iter().find(|d| !self.tasks.contains_key(*d)) {
            return Err(Error::Validation(format!(
                "Task {} depends on unknown task {}",
                task.id, missing
            )));
        }

        self.graph.add_node(&task.id);
        for dep in &task.dependencies {
            self.graph.add_dependency(dep, &task.id)?;
        }
        clog_debug!("Task added: {} ({})", task.id, task.title);
        self.order.push(task.id.clone());
        self.originals.insert(task.id.clone(), TaskSnapshot::from(&task));
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// The task's definition at ingestion. Adaptations start from this.
    pub fn original(&self, id: &TaskId) -> Option<&TaskSnapshot> {
        self.originals.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Pending tasks in insertion order.
    pub fn backlog(&self) -> Vec<&Task> {
        self.tasks().filter(|t| t.is_pending()).collect()
    }

    pub fn completed_ids(&self) -> &BTreeSet<TaskId> {
        &self.completed
    }

    pub fn output(&self, id: &TaskId) -> Option<&str> {
        self.outputs.get(id).map(String::as_str)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Tasks currently Assigned or Running.
    pub fn in_flight_count(&self) -> usize {
        self.tasks.values().filter(|t| t.is_in_flight()).count()
    }

    pub fn in_flight_ids(&self) -> Vec<TaskId> {
        self.tasks()
            .filter(|t| t.is_in_flight())
            .map(|t| t.id.clone())
            .collect()
    }

    /// No pending task and nothing in flight.
    pub fn is_drained(&self) -> bool {
        self.tasks.values().all(|t| !t.is_pending() && !t.is_in_flight())
    }

    fn task_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))
    }

    /// Pending -> Assigned.
    pub fn mark_assigned(&mut self, id: &TaskId, agent_id: &AgentId) -> Result<()> {
        let task = self.task_mut(id)?;
        if !task.is_pending() {
            return Err(transition_error(&task.status, "assigned"));
        }
        task.assign(agent_id.clone());
        Ok(())
    }

    /// Failed or Pending -> Assigned, binding the task to `agent_id`.
    ///
    /// Used by the retry policy; clears the previous attempt's outcome.
    pub fn reassign(&mut self, id: &TaskId, agent_id: &AgentId) -> Result<()> {
        let task = self.task_mut(id)?;
        if !matches!(task.status, TaskStatus::Failed { .. } | TaskStatus::Pending) {
            return Err(transition_error(&task.status, "assigned"));
        }
        task.requeue();
        task.completed_at = None;
        task.assign(agent_id.clone());
        Ok(())
    }

    /// Assigned -> Running. Returns the bound agent.
    pub fn mark_running(&mut self, id: &TaskId) -> Result<AgentId> {
        let task = self.task_mut(id)?;
        if task.status != TaskStatus::Assigned {
            return Err(transition_error(&task.status, "running"));
        }
        let agent_id = task
            .agent_id
            .clone()
            .ok_or_else(|| Error::Validation(format!("Task {} has no agent", id)))?;
        task.start();
        Ok(agent_id)
    }

    /// In flight -> Completed.
    ///
    /// Repeated completion of an already completed task is a no-op that
    /// logs a warning and reports [`CompletionOutcome::Duplicate`].
    pub fn mark_completed(&mut self, id: &TaskId, output: &str) -> Result<CompletionOutcome> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        match task.status {
            TaskStatus::Completed => {
                clog_warn!("Duplicate completion signal for task {}", id);
                Ok(CompletionOutcome::Duplicate)
            }
            TaskStatus::Assigned | TaskStatus::Running => {
                task.complete();
                self.completed.insert(id.clone());
                self.outputs.insert(id.clone(), output.to_string());
                Ok(CompletionOutcome::Completed)
            }
            ref other => Err(transition_error(other, "completed")),
        }
    }

    /// In flight -> Failed.
    pub fn mark_failed(&mut self, id: &TaskId, error: &str) -> Result<()> {
        let task = self.task_mut(id)?;
        if !task.is_in_flight() {
            return Err(transition_error(&task.status, "failed"));
        }
        task.fail(error);
        Ok(())
    }

    /// Failed or in flight -> Pending.
    pub fn requeue(&mut self, id: &TaskId) -> Result<()> {
        let task = self.task_mut(id)?;
        if !(task.is_in_flight() || matches!(task.status, TaskStatus::Failed { .. })) {
            return Err(transition_error(&task.status, "pending"));
        }
        task.requeue();
        task.completed_at = None;
        Ok(())
    }

    /// Block a task. Returns false if it was already blocked.
    ///
    /// Completed tasks cannot be blocked.
    pub fn mark_blocked(&mut self, id: &TaskId, reason: &str) -> Result<bool> {
        let task = self.task_mut(id)?;
        match task.status {
            TaskStatus::Blocked { .. } => Ok(false),
            TaskStatus::Completed => Err(transition_error(&task.status, "blocked")),
            _ => {
                clog_warn!("Task {} blocked: {}", id, reason);
                task.block(reason);
                Ok(true)
            }
        }
    }

    /// Block every pending task that transitively depends on `id`.
    ///
    /// Returns the newly blocked ids in insertion order.
    pub fn block_dependents(&mut self, id: &TaskId) -> Vec<TaskId> {
        let dependents = self.graph.transitive_dependents(id);
        let reason = format!("dependency {} is blocked", id);
        let targets: Vec<TaskId> = self
            .order
            .iter()
            .filter(|t| dependents.contains(*t))
            .filter(|t| self.tasks.get(*t).is_some_and(|task| task.is_pending()))
            .cloned()
            .collect();

        for target in &targets {
            if let Some(task) = self.tasks.get_mut(target) {
                clog_warn!("Task {} blocked: {}", target, reason);
                task.block(&reason);
            }
        }
        targets
    }

    /// Record that `agent_id` may no longer be given this task.
    pub fn exclude_agent(&mut self, id: &TaskId, agent_id: &AgentId) -> Result<()> {
        self.task_mut(id)?.excluded_agents.insert(agent_id.clone());
        Ok(())
    }

    /// Overwrite the non-identity fields of a task that has not started.
    ///
    /// Pending tasks are adapted at commit; assigned ones when the retry
    /// policy moves them to another agent.
    ///
    /// # Errors
    /// Returns `AdaptationConflict` if the snapshot alters a protected field.
    pub fn replace_fields(&mut self, id: &TaskId, after: &TaskSnapshot) -> Result<()> {
        let task = self.task_mut(id)?;
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Assigned) {
            return Err(transition_error(&task.status, "adapted"));
        }
        let before = TaskSnapshot::from(&*task);
        if let Some(field) = before.protected_field_change(after) {
            return Err(Error::AdaptationConflict {
                task_id: id.clone(),
                field: field.to_string(),
            });
        }
        after.apply_to(task);
        Ok(())
    }

    /// Undo any adaptation, putting back the definition captured at ingestion.
    ///
    /// Returns whether any field changed. Running and completed tasks are
    /// left alone.
    pub fn restore_original(&mut self, id: &TaskId) -> Result<bool> {
        let original = self
            .originals
            .get(id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
        let task = self.task_mut(id)?;
        if matches!(task.status, TaskStatus::Running | TaskStatus::Completed) {
            return Err(transition_error(&task.status, "restored"));
        }
        if TaskSnapshot::from(&*task) == original {
            return Ok(false);
        }
        original.apply_to(task);
        clog_debug!("Task {} restored to its original definition", id);
        Ok(true)
    }
}

fn transition_error(from: &TaskStatus, to: &str) -> Error {
    let from = match from {
        TaskStatus::Failed { .. } => "failed".to_string(),
        TaskStatus::Blocked { .. } => "blocked".to_string(),
        other => other.to_string(),
    };
    Error::InvalidStateTransition {
        from,
        to: to.to_string(),
    }
}
