//! Planning cycle snapshots.

use crate::core::{AgentId, TaskId};
use crate::orchestration::adaptation::AdaptationRecord;
use crate::orchestration::generation::GenerationRecord;
use serde::{Deserialize, Serialize};

/// A task bound to an agent by a planning cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    /// Skill match score of the chosen agent.
    pub score: f64,
}

/// The outcome of one planning pass.
///
/// Produced by `Orchestrator::plan` without side effects and applied by
/// `Orchestrator::commit`. Cycle ids increase strictly within a run; a
/// cycle whose id is not newer than the last applied one is rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningCycle {
    pub id: u64,
    /// Tasks bound to an agent this cycle, in rank order.
    pub selected: Vec<TaskId>,
    pub assignments: Vec<Assignment>,
    /// Eligible tasks left for a later cycle.
    pub deferred: Vec<TaskId>,
    /// Eligible tasks no agent qualifies for.
    pub unassigned: Vec<TaskId>,
    pub adaptations: Vec<AdaptationRecord>,
    pub generated: Vec<GenerationRecord>,
    pub rationale: Vec<String>,
    /// Mean assignment score; 0 when nothing was assigned.
    pub confidence: f64,
    /// Tasks blocked when the cycle was committed.
    pub blocked: Vec<TaskId>,
}

impl PlanningCycle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Whether applying this cycle changes nothing.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
            && self.unassigned.is_empty()
            && self.adaptations.is_empty()
            && self.generated.is_empty()
    }

    pub fn assignment_for(&self, task_id: &TaskId) -> Option<&Assignment> {
        self.assignments.iter().find(|a| &a.task_id == task_id)
    }

    /// Number of tasks assigned to `agent_id` in this cycle.
    pub fn assigned_to(&self, agent_id: &AgentId) -> usize {
        self.assignments
            .iter()
            .filter(|a| &a.agent_id == agent_id)
            .count()
    }

    pub(crate) fn finish(&mut self) {
        self.confidence = if self.assignments.is_empty() {
            0.0
        } else {
            self.assignments.iter().map(|a| a.score).sum::<f64>() / self.assignments.len() as f64
        };
    }
}
