//! Task adaptation: rewriting a selected task's non-identity fields to fit
//! the agent it was assigned to.

use crate::config::Mode;
use crate::core::{Agent, AgentStats, Task, TaskId, TaskSnapshot};
use serde::{Deserialize, Serialize};

/// Audit record of one adaptation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationRecord {
    pub task_id: TaskId,
    pub reason: String,
    pub before: TaskSnapshot,
    pub after: TaskSnapshot,
}

/// What an adapter sees about the assignment it is adapting for.
#[derive(Debug, Clone, Copy)]
pub struct AdaptationContext<'a> {
    pub agent: &'a Agent,
    pub stats: AgentStats,
    pub mode: Mode,
}

/// A proposed rewrite.
#[derive(Debug, Clone, PartialEq)]
pub struct Adaptation {
    pub reason: String,
    pub after: TaskSnapshot,
}

/// Proposes rewrites for adaptable tasks.
///
/// `task` is always the definition the task was ingested with, never an
/// earlier rewrite. Proposals are checked before they are recorded; one that touches the
/// id, dependencies, required skills or adaptable flag is discarded.
pub trait TaskAdapter: Send + Sync {
    fn adapt(&self, task: &Task, ctx: &AdaptationContext<'_>) -> Option<Adaptation>;
}

/// Scopes tasks to the assigned agent.
///
/// When the agent lacks some required skills the description gains a
/// scoping note and the missing skills are recorded as a support resource.
/// In learning mode the effort estimate is scaled by the agent's observed
/// failure rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAdapter;

impl TaskAdapter for HeuristicAdapter {
    fn adapt(&self, task: &Task, ctx: &AdaptationContext<'_>) -> Option<Adaptation> {
        let mut after = TaskSnapshot::from(task);
        let mut reasons = Vec::new();

        let missing = ctx.agent.missing_skills(&task.required_skills);
        if !missing.is_empty() {
            let list = missing.join(", ");
            after.description = if task.description.is_empty() {
                format!("Scoped for {}: flag gaps in {}", ctx.agent.name, list)
            } else {
                format!(
                    "{} (scoped for {}: flag gaps in {})",
                    task.description, ctx.agent.name, list
                )
            };
            after.resources.insert("support".to_string(), list.clone());
            reasons.push(format!("agent {} lacks {}", ctx.agent.id, list));
        }

        if ctx.mode.learns() && ctx.stats.failed > 0 {
            let scaled = (f64::from(task.estimated_effort) * (1.0 + ctx.stats.failure_rate())).ceil();
            let scaled = scaled as u32;
            if scaled > task.estimated_effort {
                after.estimated_effort = scaled;
                reasons.push(format!(
                    "agent {} failed {} of {} tasks",
                    ctx.agent.id,
                    ctx.stats.failed,
                    ctx.stats.failed + ctx.stats.completed
                ));
            }
        }

        if reasons.is_empty() {
            return None;
        }
        Some(Adaptation {
            reason: reasons.join("; "),
            after,
        })
    }
}
