//! The orchestrator state machine.
//!
//! `plan` computes a [`PlanningCycle`] from the current backlog and agent
//! loads without touching either; `commit` applies a cycle. Keeping the
//! two apart lets the single writer of a run plan, inspect and apply
//! cycles atomically, and lets tests compare repeated plans for equality.
//!
//! States follow `Idle -> Planning -> Assigning -> (Waiting | Replanning)`
//! with `Done` once the backlog is drained or the run ends.

use crate::config::OrchestrationConfig;
use crate::core::{
    AgentId, AgentRegistry, Task, TaskId, TaskRepository, TaskSnapshot,
};
use crate::error::{Error, Result};
use crate::orchestration::adaptation::{
    AdaptationContext, AdaptationRecord, HeuristicAdapter, TaskAdapter,
};
use crate::orchestration::cycle::{Assignment, PlanningCycle};
use crate::orchestration::generation::{
    GenerationRecord, Objective, ObjectiveGenerator, TaskGenerator,
};
use crate::orchestration::strategy::{
    distributor_for, prioritizer_for, Distributor, Prioritizer, RankedTask, TaskRanker,
};
use crate::team::Team;
use crate::{clog, clog_debug, clog_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Planning,
    Assigning,
    /// Tasks are in flight; waiting for execution events.
    Waiting,
    /// An event arrived or nothing is in flight; a new cycle is due.
    Replanning,
    Done,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Planning => "planning",
            OrchestratorState::Assigning => "assigning",
            OrchestratorState::Waiting => "waiting",
            OrchestratorState::Replanning => "replanning",
            OrchestratorState::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// A state entered, with its timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub state: OrchestratorState,
    pub entered_at: DateTime<Utc>,
}

/// The pluggable decisions of a run.
pub struct Strategies {
    pub prioritizer: Box<dyn Prioritizer>,
    pub distributor: Box<dyn Distributor>,
    pub adapter: Box<dyn TaskAdapter>,
    pub generator: Box<dyn TaskGenerator>,
}

impl Strategies {
    /// The strategies `config` names, with the default adapter and generator.
    pub fn from_config(
        config: &OrchestrationConfig,
        ranker: Option<Arc<dyn TaskRanker>>,
    ) -> Result<Self> {
        Ok(Self {
            prioritizer: prioritizer_for(config.prioritization, config.urgency_per_cycle, ranker)?,
            distributor: distributor_for(config.distribution),
            adapter: Box::new(HeuristicAdapter),
            generator: Box::new(ObjectiveGenerator),
        })
    }

    pub fn with_adapter(mut self, adapter: impl TaskAdapter + 'static) -> Self {
        self.adapter = Box::new(adapter);
        self
    }

    pub fn with_generator(mut self, generator: impl TaskGenerator + 'static) -> Self {
        self.generator = Box::new(generator);
        self
    }

    pub fn with_prioritizer(mut self, prioritizer: impl Prioritizer + 'static) -> Self {
        self.prioritizer = Box::new(prioritizer);
        self
    }

    pub fn with_distributor(mut self, distributor: impl Distributor + 'static) -> Self {
        self.distributor = Box::new(distributor);
        self
    }
}

/// Selects, adapts, generates and assigns tasks, one cycle at a time.
pub struct Orchestrator {
    config: OrchestrationConfig,
    repository: TaskRepository,
    registry: AgentRegistry,
    objectives: Vec<Objective>,
    strategies: Strategies,
    state: OrchestratorState,
    state_history: Vec<StateHistoryEntry>,
    last_applied: u64,
    /// Cycles each eligible task has been passed over.
    waited: HashMap<TaskId, u32>,
    /// Consecutive cycles each task found no qualified agent.
    unassigned_streak: HashMap<TaskId, u32>,
    /// Objectives a task has already been generated for.
    generated_objectives: BTreeSet<String>,
    history: Vec<PlanningCycle>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestrationConfig,
        repository: TaskRepository,
        registry: AgentRegistry,
        objectives: Vec<Objective>,
        strategies: Strategies,
    ) -> Self {
        Self {
            config,
            repository,
            registry,
            objectives,
            strategies,
            state: OrchestratorState::Idle,
            state_history: vec![StateHistoryEntry {
                state: OrchestratorState::Idle,
                entered_at: Utc::now(),
            }],
            last_applied: 0,
            waited: HashMap::new(),
            unassigned_streak: HashMap::new(),
            generated_objectives: BTreeSet::new(),
            history: Vec::new(),
        }
    }

    /// Build an orchestrator for a validated team.
    ///
    /// Agents without their own concurrency limit are bounded by the
    /// run's `max_active_tasks`.
    pub fn from_team(team: Team, strategies: Strategies) -> Result<Self> {
        let repository = TaskRepository::from_tasks(team.tasks)?;
        let registry = AgentRegistry::from_agents(team.agents, team.config.max_active_tasks)?;
        Ok(Self::new(
            team.config,
            repository,
            registry,
            team.objectives,
            strategies,
        ))
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn repository(&self) -> &TaskRepository {
        &self.repository
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Both stores, for the execution side of the single writer.
    pub fn stores_mut(&mut self) -> (&mut TaskRepository, &mut AgentRegistry) {
        (&mut self.repository, &mut self.registry)
    }

    pub fn objectives(&self) -> &[Objective] {
        &self.objectives
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn state_history(&self) -> &[StateHistoryEntry] {
        &self.state_history
    }

    /// Id of the last committed cycle; 0 before the first.
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Committed cycles in order.
    pub fn history(&self) -> &[PlanningCycle] {
        &self.history
    }

    pub fn cycles_waited(&self, id: &TaskId) -> u32 {
        self.waited.get(id).copied().unwrap_or(0)
    }

    pub fn unassigned_streak(&self, id: &TaskId) -> u32 {
        self.unassigned_streak.get(id).copied().unwrap_or(0)
    }

    pub fn is_done(&self) -> bool {
        self.state == OrchestratorState::Done
    }

    pub fn can_transition(&self, target: OrchestratorState) -> bool {
        use OrchestratorState::*;
        matches!(
            (self.state, target),
            (Idle, Planning)
                | (Idle, Done)
                | (Planning, Assigning)
                | (Assigning, Waiting)
                | (Assigning, Replanning)
                | (Assigning, Done)
                | (Waiting, Replanning)
                | (Waiting, Done)
                | (Replanning, Planning)
                | (Replanning, Done)
        )
    }

    fn transition(&mut self, target: OrchestratorState) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        clog_debug!("Orchestrator: {} -> {}", self.state, target);
        self.state = target;
        self.state_history.push(StateHistoryEntry {
            state: target,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    /// Note that an execution event makes a new cycle due.
    pub fn request_replan(&mut self) {
        if self.state == OrchestratorState::Waiting {
            let _ = self.transition(OrchestratorState::Replanning);
        }
    }

    /// Enter `Done`. No-op if already there.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == OrchestratorState::Done {
            return Ok(());
        }
        self.transition(OrchestratorState::Done)
    }

    /// Compute the next planning cycle without changing any state.
    ///
    /// Repeated calls with no commit or execution event in between return
    /// equal cycles.
    pub fn plan(&self) -> PlanningCycle {
        let mut cycle = PlanningCycle::new(self.last_applied + 1);
        let generated = self.generate(&mut cycle);

        let completed = self.repository.completed_ids();
        let eligible: Vec<&Task> = self
            .repository
            .backlog()
            .into_iter()
            .filter(|t| t.dependencies_met(completed))
            .chain(generated.iter())
            .collect();
        let by_id: HashMap<&TaskId, &Task> = eligible.iter().map(|t| (&t.id, *t)).collect();

        let entries: Vec<RankedTask<'_>> = eligible
            .iter()
            .map(|&task| RankedTask {
                task,
                cycles_waited: self.cycles_waited(&task.id),
            })
            .collect();
        let ranked = self.strategies.prioritizer.rank(&entries);

        let mut slots = self
            .config
            .max_active_tasks
            .saturating_sub(self.repository.in_flight_count());
        let mut capacity = self.registry.total_remaining();
        let mut pending: HashMap<AgentId, usize> = HashMap::new();
        let mut seen: BTreeSet<&TaskId> = BTreeSet::new();

        for task_id in &ranked {
            let Some(&task) = by_id.get(task_id) else {
                continue;
            };
            if !seen.insert(&task.id) {
                continue;
            }
            if slots == 0 || capacity == 0 {
                cycle.deferred.push(task.id.clone());
                continue;
            }

            let candidates =
                self.registry
                    .candidates(task, self.config.min_skill_match, &pending);
            if candidates.is_empty() {
                cycle.rationale.push(format!(
                    "{}: no agent meets skill match {:.2}",
                    task.id, self.config.min_skill_match
                ));
                cycle.unassigned.push(task.id.clone());
                continue;
            }
            let Some(chosen) = self.strategies.distributor.choose(&candidates) else {
                cycle
                    .rationale
                    .push(format!("{}: qualified agents at capacity", task.id));
                cycle.deferred.push(task.id.clone());
                continue;
            };

            let assignment = Assignment {
                task_id: task.id.clone(),
                agent_id: chosen.agent_id.clone(),
                score: chosen.score,
            };
            *pending.entry(assignment.agent_id.clone()).or_insert(0) += 1;
            slots -= 1;
            capacity -= 1;

            cycle.rationale.push(format!(
                "{} -> {} ({}, score {:.2}, load {})",
                task.id,
                assignment.agent_id,
                self.strategies.distributor.name(),
                assignment.score,
                chosen.load
            ));
            match self.adaptation_for(task, &assignment.agent_id) {
                Ok(Some(record)) => cycle.adaptations.push(record),
                Ok(None) => {}
                Err(err) => {
                    clog_warn!("{}; keeping original", err);
                    if let Error::AdaptationConflict { field, .. } = err {
                        cycle
                            .rationale
                            .push(format!("{}: adaptation rejected ({})", task.id, field));
                    }
                }
            }
            cycle.selected.push(task.id.clone());
            cycle.assignments.push(assignment);
        }

        cycle.finish();
        cycle
    }

    /// Synthesize tasks for uncovered high-priority objectives.
    fn generate(&self, cycle: &mut PlanningCycle) -> Vec<Task> {
        let mut generated = Vec::new();
        if !self.config.generation_enabled() {
            return generated;
        }

        for objective in &self.objectives {
            if objective.priority < self.config.high_priority_threshold
                || self.generated_objectives.contains(&objective.name)
            {
                continue;
            }
            let covered = self
                .repository
                .tasks()
                .filter(|t| !t.is_blocked())
                .any(|t| objective.is_covered_by(t));
            if covered {
                continue;
            }

            let id = TaskId::generated(cycle.id, &objective.name);
            if self.repository.contains(&id) || generated.iter().any(|t: &Task| t.id == id) {
                clog_debug!("Generated id {} already taken, skipping {}", id, objective.name);
                continue;
            }
            let Some(snapshot) = self.strategies.generator.generate(objective, id.clone()) else {
                continue;
            };
            if snapshot.id != id || !snapshot.dependencies.is_empty() {
                clog_warn!(
                    "Generated task for objective {} rejected: expected id {} with no dependencies",
                    objective.name,
                    id
                );
                continue;
            }

            cycle.rationale.push(format!(
                "{}: generated for objective {} (priority {})",
                id, objective.name, objective.priority
            ));
            cycle.generated.push(GenerationRecord {
                task_id: id,
                objective: objective.name.clone(),
                reason: format!(
                    "no task covers objective '{}' with priority {}",
                    objective.name, objective.priority
                ),
                task: snapshot.clone(),
            });
            generated.push(snapshot.into_task());
        }
        generated
    }

    /// Ask the adapter for a rewrite of `task` for `agent_id`.
    ///
    /// The adapter always sees the task as it was ingested, so notes made
    /// for an earlier agent never carry over. When the new agent needs no
    /// rewrite but the task still carries one, the record restores the
    /// original.
    ///
    /// # Errors
    /// `AdaptationConflict` if the proposal alters a protected field.
    fn adaptation_for(
        &self,
        task: &Task,
        agent_id: &AgentId,
    ) -> Result<Option<AdaptationRecord>> {
        if !task.adaptable || !self.config.adaptation_enabled() {
            return Ok(None);
        }
        let Some(agent) = self.registry.get(agent_id) else {
            return Ok(None);
        };
        let before = TaskSnapshot::from(task);
        let original = self
            .repository
            .original(&task.id)
            .cloned()
            .unwrap_or_else(|| before.clone());
        let mut base = task.clone();
        original.apply_to(&mut base);

        let ctx = AdaptationContext {
            agent,
            stats: self.registry.stats(agent_id).unwrap_or_default(),
            mode: self.config.mode,
        };
        let (reason, after) = match self.strategies.adapter.adapt(&base, &ctx) {
            Some(adaptation) => {
                if let Some(field) = before.protected_field_change(&adaptation.after) {
                    return Err(Error::AdaptationConflict {
                        task_id: task.id.clone(),
                        field: field.to_string(),
                    });
                }
                (adaptation.reason, adaptation.after)
            }
            None => (
                format!("agent {} needs no rewrite; original restored", agent_id),
                original,
            ),
        };
        if before == after {
            return Ok(None);
        }
        Ok(Some(AdaptationRecord {
            task_id: task.id.clone(),
            reason,
            before,
            after,
        }))
    }

    /// Adapt an assigned task for the agent it is now bound to.
    ///
    /// Called when the retry policy moves a task to another agent outside
    /// a planning cycle. Returns the applied record, if anything changed.
    pub fn adapt_assigned(&mut self, task_id: &TaskId) -> Option<AdaptationRecord> {
        let task = self.repository.get(task_id)?;
        let agent_id = task.agent_id.clone()?;
        let record = match self.adaptation_for(task, &agent_id) {
            Ok(record) => record?,
            Err(err) => {
                clog_warn!("{}; keeping original", err);
                return None;
            }
        };
        if let Err(e) = self.repository.replace_fields(task_id, &record.after) {
            clog_warn!("Adaptation of {} dropped: {}", task_id, e);
            return None;
        }
        clog_debug!("Task {} adapted for {}: {}", task_id, agent_id, record.reason);
        Some(record)
    }

    /// Check that `cycle` still fits the current state.
    fn validate_cycle(&self, cycle: &PlanningCycle) -> Result<()> {
        if cycle.id <= self.last_applied {
            return Err(Error::StaleCycle {
                cycle_id: cycle.id,
                last_applied: self.last_applied,
            });
        }

        let generated: BTreeSet<&TaskId> = cycle.generated.iter().map(|g| &g.task_id).collect();
        let mut per_agent: HashMap<&AgentId, usize> = HashMap::new();
        for assignment in &cycle.assignments {
            let pending = generated.contains(&assignment.task_id)
                || self
                    .repository
                    .get(&assignment.task_id)
                    .is_some_and(Task::is_pending);
            if !pending {
                return Err(Error::Validation(format!(
                    "Cycle {} assigns task {} which is no longer pending",
                    cycle.id, assignment.task_id
                )));
            }
            *per_agent.entry(&assignment.agent_id).or_insert(0) += 1;
        }
        for (agent_id, count) in per_agent {
            let remaining = self.registry.capacity_of(agent_id)?;
            if count > remaining {
                return Err(Error::Validation(format!(
                    "Cycle {} assigns {} tasks to agent {} with {} remaining",
                    cycle.id, count, agent_id, remaining
                )));
            }
        }
        let in_flight = self.repository.in_flight_count();
        if in_flight + cycle.assignments.len() > self.config.max_active_tasks {
            return Err(Error::Validation(format!(
                "Cycle {} exceeds max active tasks ({} in flight + {} new > {})",
                cycle.id,
                in_flight,
                cycle.assignments.len(),
                self.config.max_active_tasks
            )));
        }
        Ok(())
    }

    fn begin_planning(&mut self) -> Result<()> {
        if self.state == OrchestratorState::Waiting {
            self.transition(OrchestratorState::Replanning)?;
        }
        self.transition(OrchestratorState::Planning)
    }

    /// Apply a planned cycle.
    ///
    /// Writes generated tasks and adaptations, reserves capacity, marks
    /// assignments, advances waiting counters, and blocks tasks that have
    /// gone `max_unassigned_cycles` cycles without a qualified agent along
    /// with their dependents. Returns the cycle with `blocked` filled in.
    ///
    /// # Errors
    /// `StaleCycle` if a newer cycle was already applied; `Validation` if
    /// the cycle no longer fits the current loads or task states.
    pub fn commit(&mut self, mut cycle: PlanningCycle) -> Result<PlanningCycle> {
        self.validate_cycle(&cycle)?;
        self.begin_planning()?;
        self.transition(OrchestratorState::Assigning)?;

        for record in &cycle.generated {
            self.repository.add_task(record.task.clone().into_task())?;
            self.generated_objectives.insert(record.objective.clone());
            clog!(
                "Generated task {} for objective {}",
                record.task_id,
                record.objective
            );
        }

        for record in &cycle.adaptations {
            if let Err(e) = self.repository.replace_fields(&record.task_id, &record.after) {
                clog_warn!("Adaptation of {} dropped: {}", record.task_id, e);
            }
        }

        for assignment in &cycle.assignments {
            self.registry.reserve(&assignment.agent_id)?;
            self.repository
                .mark_assigned(&assignment.task_id, &assignment.agent_id)?;
            self.waited.remove(&assignment.task_id);
            self.unassigned_streak.remove(&assignment.task_id);
        }

        for id in &cycle.deferred {
            *self.waited.entry(id.clone()).or_insert(0) += 1;
        }

        for id in &cycle.unassigned {
            *self.waited.entry(id.clone()).or_insert(0) += 1;
            let streak = {
                let entry = self.unassigned_streak.entry(id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            clog_warn!(
                "{} ({} of {} cycles)",
                Error::UnassignableTask {
                    task_id: id.clone()
                },
                streak,
                self.config.max_unassigned_cycles
            );
            if streak >= self.config.max_unassigned_cycles {
                let reason = format!("no capable agent after {} cycles", streak);
                if self.repository.mark_blocked(id, &reason)? {
                    cycle.blocked.push(id.clone());
                }
                cycle.blocked.extend(self.repository.block_dependents(id));
                self.waited.remove(id);
                self.unassigned_streak.remove(id);
            }
        }

        self.last_applied = cycle.id;
        clog!(
            "Cycle {} committed: {} assigned, {} deferred, {} unassigned, {} blocked, confidence {:.2}",
            cycle.id,
            cycle.assignments.len(),
            cycle.deferred.len(),
            cycle.unassigned.len(),
            cycle.blocked.len(),
            cycle.confidence
        );

        let next = if self.repository.is_drained() {
            OrchestratorState::Done
        } else if self.repository.in_flight_count() > 0 {
            OrchestratorState::Waiting
        } else {
            OrchestratorState::Replanning
        };
        self.transition(next)?;

        self.history.push(cycle.clone());
        Ok(cycle)
    }
}
