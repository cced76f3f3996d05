//! Execution coordination and retry policy.
//!
//! The `ExecutionCoordinator` drives assigned tasks through
//! `Assigned -> Running -> {Completed, Failed}` and decides what happens
//! after a failure: retry on the same agent, reassign to an untried
//! qualified agent, wait for one to free up, or block the task.

use crate::config::OrchestrationConfig;
use crate::core::{AgentId, AgentRegistry, CompletionOutcome, TaskId, TaskRepository};
use crate::error::{Error, Result};
use crate::orchestration::strategy::{distributor_for, Distributor};
use crate::{clog_debug, clog_warn};
use std::collections::HashMap;

/// What to do with a task after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Run again on the same agent; capacity is already reserved.
    RetrySameAgent { agent_id: AgentId, attempt: u32 },
    /// Run on a different qualified agent; capacity is already reserved.
    ///
    /// The task is back to its original definition; adapting it for `to`
    /// is up to the caller.
    Reassign {
        from: Option<AgentId>,
        to: AgentId,
        attempt: u32,
        /// Skill match score of `to`.
        score: f64,
    },
    /// Untried qualified agents exist but none has capacity; the task is
    /// back in the backlog.
    Requeue,
    /// No untried qualified agent remains.
    Block {
        reason: String,
        /// Pending tasks blocked because they depend on this one.
        dependents: Vec<TaskId>,
    },
}

/// Tracks same-agent retry counts per task.
///
/// # Example
///
/// ```
/// use conductor::orchestration::RetryTracker;
/// use conductor::core::TaskId;
///
/// let mut tracker = RetryTracker::new();
/// let task_id = TaskId::from("T1");
///
/// assert_eq!(tracker.get_retries(&task_id), 0);
/// tracker.increment(&task_id);
/// assert_eq!(tracker.get_retries(&task_id), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RetryTracker {
    retries: HashMap<TaskId, u32>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns 0 if the task has not been retried.
    pub fn get_retries(&self, task_id: &TaskId) -> u32 {
        self.retries.get(task_id).copied().unwrap_or(0)
    }

    /// Returns the new retry count.
    pub fn increment(&mut self, task_id: &TaskId) -> u32 {
        let count = self.retries.entry(task_id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&mut self, task_id: &TaskId) {
        self.retries.remove(task_id);
    }

    pub fn clear(&mut self) {
        self.retries.clear();
    }

    pub fn len(&self) -> usize {
        self.retries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retries.is_empty()
    }
}

/// Drives task execution state and applies the retry policy.
///
/// Holds no store of its own: every operation takes the repository and
/// registry owned by the orchestrator, so all mutation stays with the
/// run's single writer.
pub struct ExecutionCoordinator {
    max_retries: u32,
    min_skill_match: f64,
    distributor: Box<dyn Distributor>,
    retries: RetryTracker,
    /// Failed attempts per task across all agents.
    attempts: HashMap<TaskId, u32>,
}

impl ExecutionCoordinator {
    pub fn new(config: &OrchestrationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            min_skill_match: config.min_skill_match,
            distributor: distributor_for(config.distribution),
            retries: RetryTracker::new(),
            attempts: HashMap::new(),
        }
    }

    pub fn retries(&self) -> &RetryTracker {
        &self.retries
    }

    /// Failed attempts recorded for a task.
    pub fn failed_attempts(&self, task_id: &TaskId) -> u32 {
        self.attempts.get(task_id).copied().unwrap_or(0)
    }

    /// Assigned -> Running. Returns the agent executing the task.
    pub fn start(&mut self, repo: &mut TaskRepository, task_id: &TaskId) -> Result<AgentId> {
        let agent_id = repo.mark_running(task_id)?;
        clog_debug!("Task {} running on {}", task_id, agent_id);
        Ok(agent_id)
    }

    /// Record a successful attempt and release the agent's capacity.
    ///
    /// A repeated completion changes nothing and reports `Duplicate`.
    pub fn complete(
        &mut self,
        repo: &mut TaskRepository,
        registry: &mut AgentRegistry,
        task_id: &TaskId,
        output: &str,
    ) -> Result<CompletionOutcome> {
        let agent_id = repo
            .get(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.clone()))?
            .agent_id
            .clone();

        let outcome = repo.mark_completed(task_id, output)?;
        if outcome == CompletionOutcome::Completed {
            if let Some(agent_id) = agent_id {
                registry.release(&agent_id)?;
                registry.record_outcome(&agent_id, true)?;
            }
            self.retries.reset(task_id);
        }
        Ok(outcome)
    }

    /// Record a failed attempt, release the agent, and apply the retry policy.
    pub fn fail(
        &mut self,
        repo: &mut TaskRepository,
        registry: &mut AgentRegistry,
        task_id: &TaskId,
        error: &str,
    ) -> Result<RetryDecision> {
        let agent_id = repo
            .get(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.clone()))?
            .agent_id
            .clone()
            .ok_or_else(|| Error::Validation(format!("Task {} has no agent", task_id)))?;

        repo.mark_failed(task_id, error)?;
        registry.release(&agent_id)?;
        registry.record_outcome(&agent_id, false)?;
        let attempt = {
            let count = self.attempts.entry(task_id.clone()).or_insert(0);
            *count += 1;
            *count + 1
        };
        clog_warn!(
            "{}",
            Error::ExecutionFailure {
                task_id: task_id.clone(),
                error: error.to_string()
            }
        );

        if self.retries.get_retries(task_id) < self.max_retries {
            self.retries.increment(task_id);
            registry.reserve(&agent_id)?;
            repo.reassign(task_id, &agent_id)?;
            return Ok(RetryDecision::RetrySameAgent { agent_id, attempt });
        }

        repo.exclude_agent(task_id, &agent_id)?;
        self.retries.reset(task_id);
        self.place(repo, registry, task_id, Some(agent_id), Some(error))
    }

    /// Try to place a requeued task on an untried qualified agent.
    pub fn reassign(
        &mut self,
        repo: &mut TaskRepository,
        registry: &mut AgentRegistry,
        task_id: &TaskId,
    ) -> Result<RetryDecision> {
        self.place(repo, registry, task_id, None, None)
    }

    fn place(
        &mut self,
        repo: &mut TaskRepository,
        registry: &mut AgentRegistry,
        task_id: &TaskId,
        from: Option<AgentId>,
        last_error: Option<&str>,
    ) -> Result<RetryDecision> {
        let task = repo
            .get(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.clone()))?;
        let candidates = registry.candidates(task, self.min_skill_match, &HashMap::new());

        if candidates.is_empty() {
            let reason = match last_error {
                Some(error) => format!("retries exhausted on every qualified agent: {}", error),
                None => "no untried qualified agent".to_string(),
            };
            repo.mark_blocked(task_id, &reason)?;
            let dependents = repo.block_dependents(task_id);
            return Ok(RetryDecision::Block { reason, dependents });
        }

        match self.distributor.choose(&candidates) {
            Some(chosen) => {
                let to = chosen.agent_id.clone();
                let score = chosen.score;
                registry.reserve(&to)?;
                repo.restore_original(task_id)?;
                repo.reassign(task_id, &to)?;
                clog_debug!("Task {} reassigned to {}", task_id, to);
                Ok(RetryDecision::Reassign {
                    from,
                    to,
                    attempt: self.failed_attempts(task_id) + 1,
                    score,
                })
            }
            None => {
                if !repo.get(task_id).is_some_and(|t| t.is_pending()) {
                    repo.requeue(task_id)?;
                }
                repo.restore_original(task_id)?;
                Ok(RetryDecision::Requeue)
            }
        }
    }

    /// Fail every in-flight task as cancelled and release all capacity.
    ///
    /// Returns the cancelled tasks with the agent each was bound to.
    pub fn cancel_all(
        &mut self,
        repo: &mut TaskRepository,
        registry: &mut AgentRegistry,
    ) -> Vec<(TaskId, Option<AgentId>)> {
        let mut cancelled = Vec::new();
        for task_id in repo.in_flight_ids() {
            let agent_id = repo.get(&task_id).and_then(|t| t.agent_id.clone());
            if let Err(e) = repo.mark_failed(&task_id, "cancelled") {
                clog_warn!("Cancel of {} failed: {}", task_id, e);
                continue;
            }
            cancelled.push((task_id, agent_id));
        }
        registry.release_all();
        self.retries.clear();
        cancelled
    }
}
