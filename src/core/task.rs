//! Task data model for the orchestration backlog.
//!
//! Tasks are the atomic units of work assigned to agents. Each task
//! carries its skill requirements and dependencies alongside the
//! runtime status the orchestrator drives it through.

use crate::core::agent::AgentId;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:-]*$").unwrap());

/// Check that an identifier is usable as a task or agent id.
pub fn is_valid_id(s: &str) -> bool {
    ID_RE.is_match(s)
}

/// Unique identifier for a task within a run.
///
/// Descriptor tasks keep the id their author chose; synthesized tasks
/// get ids derived from the cycle and objective that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Id for a task synthesized during `cycle` to cover `objective`.
    pub fn generated(cycle: u64, objective: &str) -> Self {
        let slug: String = objective
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        Self(format!("gen-{}-{}", cycle, slug.trim_matches('-')))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if is_valid_id(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(format!("invalid task id '{}'", s))
        }
    }
}

/// Task status in its lifecycle.
///
/// Backlog tasks are `Pending`; the orchestrator moves them to `Assigned`,
/// workers to `Running`, and outcomes to `Completed`, `Failed` or `Blocked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// In the backlog, waiting to be selected.
    #[default]
    Pending,
    /// Selected and bound to an agent, not yet started.
    Assigned,
    /// Being executed by an agent.
    Running,
    /// Finished successfully.
    Completed,
    /// Execution failed and will not be retried.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// The task can never run in this run.
    Blocked {
        /// Reason why the task is blocked.
        reason: String,
    },
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Blocked { reason } => write!(f, "blocked: {}", reason),
        }
    }
}

/// A task in the orchestration backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Short human-readable title.
    pub title: String,
    /// What the task should accomplish.
    pub description: String,
    /// What a successful result looks like.
    pub expected_output: String,
    /// Skills an agent needs to perform the task.
    pub required_skills: BTreeSet<String>,
    /// Relative effort estimate, in abstract units.
    pub estimated_effort: u32,
    /// Tasks that must complete before this one may be selected.
    pub dependencies: BTreeSet<TaskId>,
    /// Static priority; higher runs first under dynamic ranking.
    pub priority: i32,
    /// When false, dynamic ranking pins this task to its static priority.
    pub dynamic_priority: bool,
    /// Whether the orchestrator may rewrite non-identity fields.
    pub adaptable: bool,
    /// May be split into smaller tasks.
    pub split_compatible: bool,
    /// May be merged with sibling tasks.
    pub merge_compatible: bool,
    /// Objective this task covers, if any.
    pub objective: Option<String>,
    /// Free-form resource requirements.
    pub resources: BTreeMap<String, String>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Agent currently bound to the task.
    pub agent_id: Option<AgentId>,
    /// Agents that exhausted their retries on this task.
    #[serde(default)]
    pub excluded_agents: BTreeSet<AgentId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task with default metadata.
    pub fn new(id: impl Into<TaskId>, title: &str) -> Self {
        Self {
            id: id.into(),
            title: title.to_string(),
            description: String::new(),
            expected_output: String::new(),
            required_skills: BTreeSet::new(),
            estimated_effort: 1,
            dependencies: BTreeSet::new(),
            priority: 0,
            dynamic_priority: true,
            adaptable: false,
            split_compatible: false,
            merge_compatible: false,
            objective: None,
            resources: BTreeMap::new(),
            status: TaskStatus::Pending,
            agent_id: None,
            excluded_agents: BTreeSet::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_effort(mut self, effort: u32) -> Self {
        self.estimated_effort = effort;
        self
    }

    pub fn adaptable(mut self, adaptable: bool) -> Self {
        self.adaptable = adaptable;
        self
    }

    /// Bind the task to an agent.
    pub fn assign(&mut self, agent_id: AgentId) {
        self.status = TaskStatus::Assigned;
        self.agent_id = Some(agent_id);
    }

    /// Transition to Running and record the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Transition to Completed and record the completion time.
    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Transition to Failed and record the completion time.
    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Transition to Blocked, releasing any agent binding.
    pub fn block(&mut self, reason: &str) {
        self.status = TaskStatus::Blocked {
            reason: reason.to_string(),
        };
        self.agent_id = None;
    }

    /// Return the task to the backlog.
    pub fn requeue(&mut self) {
        self.status = TaskStatus::Pending;
        self.agent_id = None;
        self.started_at = None;
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Assigned or Running.
    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, TaskStatus::Assigned | TaskStatus::Running)
    }

    /// Completed, Failed or Blocked.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed { .. } | TaskStatus::Blocked { .. }
        )
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self.status, TaskStatus::Blocked { .. })
    }

    /// Whether all dependencies appear in `completed`.
    pub fn dependencies_met(&self, completed: &BTreeSet<TaskId>) -> bool {
        self.dependencies.iter().all(|dep| completed.contains(dep))
    }
}

/// The definitional fields of a task, without runtime state.
///
/// Used for adaptation audit records and for tasks synthesized during
/// planning, so that planning cycles compare equal when recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub expected_output: String,
    pub required_skills: BTreeSet<String>,
    pub estimated_effort: u32,
    pub dependencies: BTreeSet<TaskId>,
    pub priority: i32,
    pub dynamic_priority: bool,
    pub adaptable: bool,
    pub objective: Option<String>,
    pub resources: BTreeMap<String, String>,
}

impl TaskSnapshot {
    /// Name of the first protected field that differs from `other`.
    ///
    /// Protected fields identify the task in the dependency graph and
    /// skill matching; adaptation must never change them.
    pub fn protected_field_change(&self, other: &TaskSnapshot) -> Option<&'static str> {
        if self.id != other.id {
            Some("id")
        } else if self.dependencies != other.dependencies {
            Some("dependencies")
        } else if self.required_skills != other.required_skills {
            Some("required_skills")
        } else if self.adaptable != other.adaptable {
            Some("adaptable")
        } else {
            None
        }
    }

    /// Overwrite the task's definitional fields with this snapshot.
    pub fn apply_to(&self, task: &mut Task) {
        task.title = self.title.clone();
        task.description = self.description.clone();
        task.expected_output = self.expected_output.clone();
        task.estimated_effort = self.estimated_effort;
        task.priority = self.priority;
        task.dynamic_priority = self.dynamic_priority;
        task.objective = self.objective.clone();
        task.resources = self.resources.clone();
    }

    /// Build a fresh pending task from this snapshot.
    pub fn into_task(self) -> Task {
        let mut task = Task::new(self.id.clone(), &self.title);
        task.required_skills = self.required_skills.clone();
        task.dependencies = self.dependencies.clone();
        task.adaptable = self.adaptable;
        self.apply_to(&mut task);
        task
    }
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            expected_output: task.expected_output.clone(),
            required_skills: task.required_skills.clone(),
            estimated_effort: task.estimated_effort,
            dependencies: task.dependencies.clone(),
            priority: task.priority,
            dynamic_priority: task.dynamic_priority,
            adaptable: task.adaptable,
            objective: task.objective.clone(),
            resources: task.resources.clone(),
        }
    }
}
