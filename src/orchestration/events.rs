//! Events emitted by a run, consumed by whatever presents it.

use crate::core::{AgentId, TaskId};
use crate::orchestration::adaptation::AdaptationRecord;
use crate::orchestration::cycle::{Assignment, PlanningCycle};
use crate::orchestration::generation::GenerationRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One observable step of a run, serialized as `{"type": "task-selected", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OrchestrationEvent {
    TaskSelected {
        cycle_id: u64,
        task_id: TaskId,
    },
    TaskAdapted {
        cycle_id: u64,
        record: AdaptationRecord,
    },
    TaskGenerated {
        cycle_id: u64,
        record: GenerationRecord,
    },
    TaskAssigned {
        cycle_id: u64,
        assignment: Assignment,
    },
    TaskStarted {
        task_id: TaskId,
        agent_id: AgentId,
    },
    TaskCompleted {
        task_id: TaskId,
        agent_id: AgentId,
        output: String,
    },
    TaskFailed {
        task_id: TaskId,
        agent_id: Option<AgentId>,
        error: String,
    },
    /// A failed task was given another attempt, on the same or another agent.
    TaskRetried {
        task_id: TaskId,
        agent_id: AgentId,
        attempt: u32,
    },
    TaskRequeued {
        task_id: TaskId,
    },
    TaskBlocked {
        task_id: TaskId,
        reason: String,
    },
    CycleCompleted {
        cycle: PlanningCycle,
    },
    RunFinished {
        run_id: Uuid,
        completed: usize,
        blocked: usize,
        failed: usize,
        unplanned: usize,
        cancelled: bool,
    },
}

impl OrchestrationEvent {
    /// The events describing a committed cycle, ending with `cycle-completed`.
    ///
    /// `reason_of` supplies the block reason for each id in `cycle.blocked`.
    pub fn from_cycle<F>(cycle: &PlanningCycle, reason_of: F) -> Vec<Self>
    where
        F: Fn(&TaskId) -> String,
    {
        let cycle_id = cycle.id;
        let mut events: Vec<Self> = cycle
            .generated
            .iter()
            .map(|record| Self::TaskGenerated {
                cycle_id,
                record: record.clone(),
            })
            .collect();

        for task_id in &cycle.selected {
            events.push(Self::TaskSelected {
                cycle_id,
                task_id: task_id.clone(),
            });
            if let Some(record) = cycle.adaptations.iter().find(|r| &r.task_id == task_id) {
                events.push(Self::TaskAdapted {
                    cycle_id,
                    record: record.clone(),
                });
            }
            if let Some(assignment) = cycle.assignment_for(task_id) {
                events.push(Self::TaskAssigned {
                    cycle_id,
                    assignment: assignment.clone(),
                });
            }
        }

        for task_id in &cycle.blocked {
            events.push(Self::TaskBlocked {
                task_id: task_id.clone(),
                reason: reason_of(task_id),
            });
        }

        events.push(Self::CycleCompleted {
            cycle: cycle.clone(),
        });
        events
    }

    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskSelected { .. } => "task-selected",
            Self::TaskAdapted { .. } => "task-adapted",
            Self::TaskGenerated { .. } => "task-generated",
            Self::TaskAssigned { .. } => "task-assigned",
            Self::TaskStarted { .. } => "task-started",
            Self::TaskCompleted { .. } => "task-completed",
            Self::TaskFailed { .. } => "task-failed",
            Self::TaskRetried { .. } => "task-retried",
            Self::TaskRequeued { .. } => "task-requeued",
            Self::TaskBlocked { .. } => "task-blocked",
            Self::CycleCompleted { .. } => "cycle-completed",
            Self::RunFinished { .. } => "run-finished",
        }
    }

    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::TaskSelected { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskRetried { task_id, .. }
            | Self::TaskRequeued { task_id }
            | Self::TaskBlocked { task_id, .. } => Some(task_id),
            Self::TaskAdapted { record, .. } => Some(&record.task_id),
            Self::TaskGenerated { record, .. } => Some(&record.task_id),
            Self::TaskAssigned { assignment, .. } => Some(&assignment.task_id),
            Self::CycleCompleted { .. } | Self::RunFinished { .. } => None,
        }
    }
}

impl std::fmt::Display for OrchestrationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaskAssigned { assignment, .. } => write!(
                f,
                "task-assigned {} -> {} ({:.2})",
                assignment.task_id, assignment.agent_id, assignment.score
            ),
            Self::TaskStarted { task_id, agent_id } => {
                write!(f, "task-started {} on {}", task_id, agent_id)
            }
            Self::TaskFailed { task_id, error, .. } => {
                write!(f, "task-failed {}: {}", task_id, error)
            }
            Self::TaskRetried {
                task_id,
                agent_id,
                attempt,
            } => write!(f, "task-retried {} on {} (attempt {})", task_id, agent_id, attempt),
            Self::TaskBlocked { task_id, reason } => {
                write!(f, "task-blocked {}: {}", task_id, reason)
            }
            Self::TaskAdapted { record, .. } => {
                write!(f, "task-adapted {}: {}", record.task_id, record.reason)
            }
            Self::TaskGenerated { record, .. } => write!(
                f,
                "task-generated {} for {}",
                record.task_id, record.objective
            ),
            Self::CycleCompleted { cycle } => write!(
                f,
                "cycle-completed {} ({} assigned, confidence {:.2})",
                cycle.id,
                cycle.assignments.len(),
                cycle.confidence
            ),
            Self::RunFinished {
                completed,
                blocked,
                failed,
                unplanned,
                ..
            } => write!(
                f,
                "run-finished: {} completed, {} blocked, {} failed, {} unplanned",
                completed, blocked, failed, unplanned
            ),
            other => match other.task_id() {
                Some(task_id) => write!(f, "{} {}", other.name(), task_id),
                None => write!(f, "{}", other.name()),
            },
        }
    }
}
