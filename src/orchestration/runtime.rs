//! The async run loop.
//!
//! A `Conductor` owns the orchestrator and the execution coordinator and is
//! the only writer of task and agent state. Workers are spawned tokio tasks
//! that run the executor and report back over an mpsc channel; the loop
//! applies their results, emits events, and re-plans.
//!
//! ```text
//!            plan/commit                 spawn
//! Conductor ------------> Orchestrator  -------> worker (TaskExecutor)
//!     ^                                              |
//!     +---------------- ExecutionEvent --------------+
//! ```

use crate::config::{Config, DEFAULT_EVENT_BUFFER};
use crate::core::{AgentId, CompletionOutcome, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::adaptation::AdaptationRecord;
use crate::orchestration::coordinator::{ExecutionCoordinator, RetryDecision};
use crate::orchestration::cycle::{Assignment, PlanningCycle};
use crate::orchestration::events::OrchestrationEvent;
use crate::orchestration::executor::{TaskExecutor, TaskOutput};
use crate::orchestration::generation::GenerationRecord;
use crate::orchestration::orchestrator::{Orchestrator, Strategies};
use crate::team::{Team, TeamDescriptor};
use crate::{clog, clog_debug, clog_error, clog_trace, clog_warn};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome of one execution attempt, reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    Completed {
        task_id: TaskId,
        agent_id: AgentId,
        output: TaskOutput,
    },
    Failed {
        task_id: TaskId,
        agent_id: AgentId,
        error: String,
    },
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub team: String,
    pub completed: Vec<TaskId>,
    /// Blocked tasks with their reasons.
    pub blocked: Vec<(TaskId, String)>,
    pub failed: Vec<TaskId>,
    /// Tasks still in the backlog when the run ended.
    pub unplanned: Vec<TaskId>,
    pub cycles: Vec<PlanningCycle>,
    pub events: Vec<OrchestrationEvent>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Every applied adaptation in emission order, including those made
    /// when a failed task moved to another agent.
    pub fn adaptations(&self) -> impl Iterator<Item = &AdaptationRecord> {
        self.events.iter().filter_map(|e| match e {
            OrchestrationEvent::TaskAdapted { record, .. } => Some(record),
            _ => None,
        })
    }

    pub fn generations(&self) -> impl Iterator<Item = &GenerationRecord> {
        self.cycles.iter().flat_map(|c| c.generated.iter())
    }

    /// Events with the given wire name, in emission order.
    pub fn events_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a OrchestrationEvent> {
        self.events.iter().filter(move |e| e.name() == name)
    }
}

enum Wake {
    Execution(ExecutionEvent),
    Deadline,
    Cancelled,
    Closed,
}

/// Runs a team to completion.
pub struct Conductor {
    run_id: Uuid,
    team: String,
    orchestrator: Orchestrator,
    coordinator: ExecutionCoordinator,
    executor: Arc<dyn TaskExecutor>,
    event_tx: Option<mpsc::Sender<OrchestrationEvent>>,
    events: Vec<OrchestrationEvent>,
    workers: HashMap<TaskId, JoinHandle<()>>,
    /// Requeued tasks waiting for capacity outside of planning.
    parked: Vec<TaskId>,
    exec_tx: mpsc::Sender<ExecutionEvent>,
    exec_rx: mpsc::Receiver<ExecutionEvent>,
}

impl Conductor {
    pub fn new(team: Team, strategies: Strategies, executor: Arc<dyn TaskExecutor>) -> Result<Self> {
        Self::with_buffer(team, strategies, executor, DEFAULT_EVENT_BUFFER)
    }

    pub fn with_buffer(
        team: Team,
        strategies: Strategies,
        executor: Arc<dyn TaskExecutor>,
        buffer: usize,
    ) -> Result<Self> {
        let name = team.name.clone();
        let orchestrator = Orchestrator::from_team(team, strategies)?;
        let coordinator = ExecutionCoordinator::new(orchestrator.config());
        let (exec_tx, exec_rx) = mpsc::channel(buffer.max(1));
        Ok(Self {
            run_id: Uuid::new_v4(),
            team: name,
            orchestrator,
            coordinator,
            executor,
            event_tx: None,
            events: Vec::new(),
            workers: HashMap::new(),
            parked: Vec::new(),
            exec_tx,
            exec_rx,
        })
    }

    /// Validate a descriptor and build a run with the strategies it names.
    ///
    /// # Errors
    /// `Configuration` for an invalid descriptor, or for `ai-driven`
    /// prioritization, which needs a ranker supplied through [`Conductor::new`].
    pub fn from_descriptor(
        descriptor: &TeamDescriptor,
        defaults: &Config,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self> {
        let team = descriptor.build(defaults)?;
        let strategies = Strategies::from_config(&team.config, None)?;
        Self::with_buffer(team, strategies, executor, defaults.event_buffer)
    }

    /// Also stream every event to `tx` as it is emitted.
    pub fn with_events(mut self, tx: mpsc::Sender<OrchestrationEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Drive the run until the backlog drains, stalls, or `cancel` fires.
    ///
    /// Per-task problems never fail the run; they surface as events and in
    /// the report.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let config = self.orchestrator.config().clone();
        clog!(
            "Run {} started: team '{}', mode {}, {} prioritization, {} distribution, continuous={}",
            self.run_id,
            self.team,
            config.mode,
            config.prioritization,
            config.distribution,
            config.continuous
        );

        let cancelled = if config.continuous {
            self.run_continuous(&cancel).await
        } else {
            self.run_once(&cancel).await
        };

        if cancelled {
            self.cancel_in_flight().await;
        }
        if let Err(e) = self.orchestrator.finish() {
            clog_warn!("Run {} did not finish cleanly: {}", self.run_id, e);
        }

        let mut report = self.report(started_at, cancelled);
        let finished = OrchestrationEvent::RunFinished {
            run_id: self.run_id,
            completed: report.completed.len(),
            blocked: report.blocked.len(),
            failed: report.failed.len(),
            unplanned: report.unplanned.len(),
            cancelled,
        };
        clog!("Run {} finished: {}", self.run_id, finished);
        self.emit(finished).await;
        report.events = std::mem::take(&mut self.events);
        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Plan once and run that assignment, retries included, to completion.
    ///
    /// Returns true if the run was cancelled.
    async fn run_once(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        if !self.orchestrator.repository().is_drained() {
            let cycle = self.orchestrator.plan();
            self.apply(cycle).await;
        }

        while !self.workers.is_empty() {
            match self.next_wake(cancel, None).await {
                Wake::Execution(event) => {
                    self.handle_execution(event).await;
                    self.launch_parked().await;
                }
                Wake::Cancelled => return true,
                Wake::Deadline | Wake::Closed => break,
            }
        }
        false
    }

    /// Re-plan after execution events until the backlog drains or stalls.
    ///
    /// Events arriving within `min_replan_interval` of a cycle are applied
    /// together before the next one.
    async fn run_continuous(&mut self, cancel: &CancellationToken) -> bool {
        let interval = self.orchestrator.config().min_replan_interval;
        loop {
            if cancel.is_cancelled() {
                return true;
            }
            if self.orchestrator.repository().is_drained() {
                return false;
            }

            let cycle = self.orchestrator.plan();
            let progress = !cycle.is_empty();
            let worth_committing = progress || !cycle.deferred.is_empty();
            if worth_committing && !self.apply(cycle).await {
                return false;
            }
            if self.orchestrator.is_done() {
                return false;
            }
            if !progress && self.workers.is_empty() {
                clog!(
                    "Run {} stalled with {} task(s) in the backlog",
                    self.run_id,
                    self.orchestrator.repository().backlog().len()
                );
                return false;
            }

            let deadline = Instant::now() + interval;
            if !self.workers.is_empty() {
                match self.next_wake(cancel, None).await {
                    Wake::Execution(event) => self.handle_execution(event).await,
                    Wake::Cancelled => return true,
                    Wake::Deadline | Wake::Closed => return false,
                }
            }
            loop {
                match self.next_wake(cancel, Some(deadline)).await {
                    Wake::Execution(event) => self.handle_execution(event).await,
                    Wake::Deadline => break,
                    Wake::Cancelled => return true,
                    Wake::Closed => return false,
                }
            }
        }
    }

    async fn next_wake(&mut self, cancel: &CancellationToken, deadline: Option<Instant>) -> Wake {
        let event = match deadline {
            Some(deadline) => tokio::select! {
                _ = cancel.cancelled() => return Wake::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return Wake::Deadline,
                event = self.exec_rx.recv() => event,
            },
            None => tokio::select! {
                _ = cancel.cancelled() => return Wake::Cancelled,
                event = self.exec_rx.recv() => event,
            },
        };
        match event {
            Some(event) => Wake::Execution(event),
            None => Wake::Closed,
        }
    }

    /// Commit a cycle, emit its events, and start its assignments.
    ///
    /// Returns false if the cycle could not be committed.
    async fn apply(&mut self, cycle: PlanningCycle) -> bool {
        let cycle = match self.orchestrator.commit(cycle) {
            Ok(cycle) => cycle,
            Err(e) => {
                clog_error!("Run {}: cycle rejected: {}", self.run_id, e);
                return false;
            }
        };

        let repository = self.orchestrator.repository();
        let events = OrchestrationEvent::from_cycle(&cycle, |id| block_reason(repository, id));
        for event in events {
            self.emit(event).await;
        }
        for assignment in &cycle.assignments {
            self.launch(&assignment.task_id).await;
        }
        true
    }

    /// Start a worker for an assigned task.
    async fn launch(&mut self, task_id: &TaskId) {
        let (repository, _) = self.orchestrator.stores_mut();
        let agent_id = match self.coordinator.start(repository, task_id) {
            Ok(agent_id) => agent_id,
            Err(e) => {
                clog_warn!("Task {} not started: {}", task_id, e);
                return;
            }
        };
        let (Some(task), Some(agent)) = (
            self.orchestrator.repository().get(task_id).cloned(),
            self.orchestrator.registry().get(&agent_id).cloned(),
        ) else {
            clog_warn!("Task {} or agent {} vanished before start", task_id, agent_id);
            return;
        };

        let executor = Arc::clone(&self.executor);
        let tx = self.exec_tx.clone();
        let worker_task = task_id.clone();
        let worker_agent = agent_id.clone();
        let handle = tokio::spawn(async move {
            clog_trace!("Worker for {} on {} started", worker_task, worker_agent);
            let result = AssertUnwindSafe(executor.execute(task, agent))
                .catch_unwind()
                .await;
            let event = match result {
                Ok(Ok(output)) => ExecutionEvent::Completed {
                    task_id: worker_task,
                    agent_id: worker_agent,
                    output,
                },
                Ok(Err(Error::ExecutionFailure { error, .. })) => ExecutionEvent::Failed {
                    task_id: worker_task,
                    agent_id: worker_agent,
                    error,
                },
                Ok(Err(e)) => ExecutionEvent::Failed {
                    task_id: worker_task,
                    agent_id: worker_agent,
                    error: e.to_string(),
                },
                Err(_) => ExecutionEvent::Failed {
                    task_id: worker_task,
                    agent_id: worker_agent,
                    error: "executor panicked".to_string(),
                },
            };
            let _ = tx.send(event).await;
        });
        self.workers.insert(task_id.clone(), handle);

        self.emit(OrchestrationEvent::TaskStarted {
            task_id: task_id.clone(),
            agent_id,
        })
        .await;
    }

    /// Apply a worker's result through the coordinator.
    async fn handle_execution(&mut self, event: ExecutionEvent) {
        match event {
            ExecutionEvent::Completed {
                task_id,
                agent_id,
                output,
            } => {
                self.workers.remove(&task_id);
                let (repository, registry) = self.orchestrator.stores_mut();
                match self
                    .coordinator
                    .complete(repository, registry, &task_id, &output.summary)
                {
                    Ok(CompletionOutcome::Completed) => {
                        clog_debug!("Task {} completed by {}", task_id, agent_id);
                        self.emit(OrchestrationEvent::TaskCompleted {
                            task_id,
                            agent_id,
                            output: output.summary,
                        })
                        .await;
                    }
                    Ok(CompletionOutcome::Duplicate) => {}
                    Err(e) => clog_warn!("Completion of {} not applied: {}", task_id, e),
                }
            }
            ExecutionEvent::Failed {
                task_id,
                agent_id,
                error,
            } => {
                self.workers.remove(&task_id);
                self.emit(OrchestrationEvent::TaskFailed {
                    task_id: task_id.clone(),
                    agent_id: Some(agent_id),
                    error: error.clone(),
                })
                .await;

                let (repository, registry) = self.orchestrator.stores_mut();
                match self.coordinator.fail(repository, registry, &task_id, &error) {
                    Ok(decision) => self.follow(task_id, decision).await,
                    Err(e) => clog_warn!("Failure of {} not applied: {}", task_id, e),
                }
            }
        }
        self.orchestrator.request_replan();
    }

    /// Act on a retry decision.
    async fn follow(&mut self, task_id: TaskId, decision: RetryDecision) {
        match decision {
            RetryDecision::RetrySameAgent { agent_id, attempt } => {
                self.emit(OrchestrationEvent::TaskRetried {
                    task_id: task_id.clone(),
                    agent_id,
                    attempt,
                })
                .await;
                self.launch(&task_id).await;
            }
            RetryDecision::Reassign {
                to, attempt, score, ..
            } => {
                self.emit(OrchestrationEvent::TaskRetried {
                    task_id: task_id.clone(),
                    agent_id: to.clone(),
                    attempt,
                })
                .await;
                let cycle_id = self.orchestrator.last_applied();
                if let Some(record) = self.orchestrator.adapt_assigned(&task_id) {
                    self.emit(OrchestrationEvent::TaskAdapted { cycle_id, record })
                        .await;
                }
                self.emit(OrchestrationEvent::TaskAssigned {
                    cycle_id,
                    assignment: Assignment {
                        task_id: task_id.clone(),
                        agent_id: to,
                        score,
                    },
                })
                .await;
                self.launch(&task_id).await;
            }
            RetryDecision::Requeue => {
                self.emit(OrchestrationEvent::TaskRequeued {
                    task_id: task_id.clone(),
                })
                .await;
                if !self.orchestrator.config().continuous {
                    self.parked.push(task_id);
                }
            }
            RetryDecision::Block { reason, dependents } => {
                self.emit(OrchestrationEvent::TaskBlocked { task_id, reason })
                    .await;
                for dependent in dependents {
                    let reason = block_reason(self.orchestrator.repository(), &dependent);
                    self.emit(OrchestrationEvent::TaskBlocked {
                        task_id: dependent,
                        reason,
                    })
                    .await;
                }
            }
        }
    }

    /// Give parked tasks another chance at a free agent.
    async fn launch_parked(&mut self) {
        for task_id in std::mem::take(&mut self.parked) {
            let (repository, registry) = self.orchestrator.stores_mut();
            match self.coordinator.reassign(repository, registry, &task_id) {
                Ok(RetryDecision::Requeue) => self.parked.push(task_id),
                Ok(decision) => self.follow(task_id, decision).await,
                Err(e) => clog_warn!("Parked task {} dropped: {}", task_id, e),
            }
        }
    }

    /// Abort workers and fail everything in flight as cancelled.
    async fn cancel_in_flight(&mut self) {
        for (task_id, handle) in self.workers.drain() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    clog_warn!("{}", Error::TaskJoin(format!("{}: {}", task_id, e)));
                }
            }
        }

        let (repository, registry) = self.orchestrator.stores_mut();
        let cancelled = self.coordinator.cancel_all(repository, registry);
        clog_warn!(
            "Run {} cancelled with {} task(s) in flight",
            self.run_id,
            cancelled.len()
        );
        for (task_id, agent_id) in cancelled {
            self.emit(OrchestrationEvent::TaskFailed {
                task_id,
                agent_id,
                error: "cancelled".to_string(),
            })
            .await;
        }
    }

    async fn emit(&mut self, event: OrchestrationEvent) {
        clog_debug!("Event: {}", event);
        let dropped = match &self.event_tx {
            Some(tx) => tx.send(event.clone()).await.is_err(),
            None => false,
        };
        if dropped {
            clog_debug!("Event receiver dropped; continuing without it");
            self.event_tx = None;
        }
        self.events.push(event);
    }

    fn report(&self, started_at: DateTime<Utc>, cancelled: bool) -> RunReport {
        let mut report = RunReport {
            run_id: self.run_id,
            team: self.team.clone(),
            completed: Vec::new(),
            blocked: Vec::new(),
            failed: Vec::new(),
            unplanned: Vec::new(),
            cycles: self.orchestrator.history().to_vec(),
            events: Vec::new(),
            cancelled,
            started_at,
            finished_at: started_at,
        };
        for task in self.orchestrator.repository().tasks() {
            match &task.status {
                TaskStatus::Completed => report.completed.push(task.id.clone()),
                TaskStatus::Blocked { reason } => {
                    report.blocked.push((task.id.clone(), reason.clone()))
                }
                TaskStatus::Failed { .. } => report.failed.push(task.id.clone()),
                TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::Running => {
                    report.unplanned.push(task.id.clone())
                }
            }
        }
        report
    }
}

fn block_reason(repository: &crate::core::TaskRepository, id: &TaskId) -> String {
    match repository.get(id).map(|t| &t.status) {
        Some(TaskStatus::Blocked { reason }) => reason.clone(),
        _ => "blocked".to_string(),
    }
}
