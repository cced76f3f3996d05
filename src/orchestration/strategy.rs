//! Ranking and distribution strategies.
//!
//! Each strategy is a trait with one decision method so the orchestrator
//! can be tested with any of them in isolation. `prioritizer_for` and
//! `distributor_for` build the implementation a run's configuration asks
//! for.

use crate::config::{DistributionKind, PrioritizationKind};
use crate::core::{AgentCandidate, Task, TaskId};
use crate::{clog_debug, Error, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// A ranking input: an eligible task and how many cycles it has waited.
#[derive(Debug, Clone, Copy)]
pub struct RankedTask<'a> {
    pub task: &'a Task,
    pub cycles_waited: u32,
}

/// Orders eligible tasks, highest priority first.
pub trait Prioritizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every input id exactly once, in rank order.
    fn rank(&self, tasks: &[RankedTask<'_>]) -> Vec<TaskId>;
}

/// Picks an agent among qualified candidates with remaining capacity.
///
/// Candidates arrive ordered by score descending, load ascending, then
/// registration order.
pub trait Distributor: Send + Sync {
    fn name(&self) -> &'static str;

    fn choose<'a>(&self, candidates: &'a [AgentCandidate]) -> Option<&'a AgentCandidate>;
}

/// External scoring function used by ai-driven prioritization.
pub trait TaskRanker: Send + Sync {
    fn rank(&self, tasks: &[&Task]) -> Vec<TaskId>;
}

/// Keeps the backlog's input order.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPrioritizer;

impl Prioritizer for StaticPrioritizer {
    fn name(&self) -> &'static str {
        "static"
    }

    fn rank(&self, tasks: &[RankedTask<'_>]) -> Vec<TaskId> {
        tasks.iter().map(|t| t.task.id.clone()).collect()
    }
}

/// Scores each task as `priority + urgency_per_cycle * cycles_waited`.
///
/// Tasks with `dynamic_priority` off keep their static priority. Equal
/// scores keep input order.
#[derive(Debug, Clone, Copy)]
pub struct DynamicPrioritizer {
    pub urgency_per_cycle: f64,
}

impl DynamicPrioritizer {
    pub fn score(&self, entry: &RankedTask<'_>) -> f64 {
        let base = f64::from(entry.task.priority);
        if entry.task.dynamic_priority {
            base + self.urgency_per_cycle * f64::from(entry.cycles_waited)
        } else {
            base
        }
    }
}

impl Prioritizer for DynamicPrioritizer {
    fn name(&self) -> &'static str {
        "dynamic"
    }

    fn rank(&self, tasks: &[RankedTask<'_>]) -> Vec<TaskId> {
        let mut scored: Vec<(f64, &RankedTask<'_>)> =
            tasks.iter().map(|t| (self.score(t), t)).collect();
        // Stable sort: ties keep input order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().map(|(_, t)| t.task.id.clone()).collect()
    }
}

/// Delegates ranking to an injected [`TaskRanker`].
///
/// The ranker's answer is sanitized: unknown and repeated ids are dropped,
/// ids it omitted are appended in input order.
pub struct AiDrivenPrioritizer {
    ranker: Arc<dyn TaskRanker>,
}

impl AiDrivenPrioritizer {
    pub fn new(ranker: Arc<dyn TaskRanker>) -> Self {
        Self { ranker }
    }
}

impl Prioritizer for AiDrivenPrioritizer {
    fn name(&self) -> &'static str {
        "ai-driven"
    }

    fn rank(&self, tasks: &[RankedTask<'_>]) -> Vec<TaskId> {
        let inputs: Vec<&Task> = tasks.iter().map(|t| t.task).collect();
        let known: HashSet<&TaskId> = inputs.iter().map(|t| &t.id).collect();
        let mut seen: HashSet<TaskId> = HashSet::new();
        let mut ranked = Vec::with_capacity(inputs.len());

        for id in self.ranker.rank(&inputs) {
            if !known.contains(&id) {
                clog_debug!("Ranker returned unknown task {}, dropped", id);
                continue;
            }
            if seen.insert(id.clone()) {
                ranked.push(id);
            }
        }
        for task in inputs {
            if seen.insert(task.id.clone()) {
                ranked.push(task.id.clone());
            }
        }
        ranked
    }
}

/// Highest skill match; ties by load, then registration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkillsBasedDistributor;

impl Distributor for SkillsBasedDistributor {
    fn name(&self) -> &'static str {
        "skills-based"
    }

    fn choose<'a>(&self, candidates: &'a [AgentCandidate]) -> Option<&'a AgentCandidate> {
        candidates.iter().find(|c| c.has_capacity())
    }
}

/// Lowest current load; ties by registration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedDistributor;

impl Distributor for BalancedDistributor {
    fn name(&self) -> &'static str {
        "balanced"
    }

    fn choose<'a>(&self, candidates: &'a [AgentCandidate]) -> Option<&'a AgentCandidate> {
        candidates
            .iter()
            .filter(|c| c.has_capacity())
            .min_by_key(|c| (c.load, c.order))
    }
}

/// First agent with free capacity in registration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvailabilityDistributor;

impl Distributor for AvailabilityDistributor {
    fn name(&self) -> &'static str {
        "availability"
    }

    fn choose<'a>(&self, candidates: &'a [AgentCandidate]) -> Option<&'a AgentCandidate> {
        candidates
            .iter()
            .filter(|c| c.has_capacity())
            .min_by_key(|c| c.order)
    }
}

/// Build the prioritizer for `kind`.
///
/// # Errors
/// `ai-driven` without a ranker is a configuration error.
pub fn prioritizer_for(
    kind: PrioritizationKind,
    urgency_per_cycle: f64,
    ranker: Option<Arc<dyn TaskRanker>>,
) -> Result<Box<dyn Prioritizer>> {
    match kind {
        PrioritizationKind::Static => Ok(Box::new(StaticPrioritizer)),
        PrioritizationKind::Dynamic => Ok(Box::new(DynamicPrioritizer { urgency_per_cycle })),
        PrioritizationKind::AiDriven => match ranker {
            Some(ranker) => Ok(Box::new(AiDrivenPrioritizer::new(ranker))),
            None => Err(Error::Configuration(
                "ai-driven prioritization requires a task ranker".to_string(),
            )),
        },
    }
}

pub fn distributor_for(kind: DistributionKind) -> Box<dyn Distributor> {
    match kind {
        DistributionKind::SkillsBased => Box::new(SkillsBasedDistributor),
        DistributionKind::Balanced => Box::new(BalancedDistributor),
        DistributionKind::Availability => Box::new(AvailabilityDistributor),
    }
}
