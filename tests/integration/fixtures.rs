//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building teams and predefined task sets
//! - Driving an orchestrator cycle by cycle
//! - Running a team on the scripted executor

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use conductor::core::{Agent, Task, TaskId};
use conductor::orchestration::{
    Conductor, Objective, Orchestrator, PlanningCycle, RunReport, ScriptedExecutor, Strategies,
};
use conductor::{OrchestrationConfig, Team};
use tokio_util::sync::CancellationToken;

/// Simulated duration of one unit of effort.
pub const TICK: Duration = Duration::from_millis(10);

/// Create an agent with the given skills.
pub fn agent(id: &str, skills: &[&str]) -> Agent {
    Agent::new(id, &id.to_uppercase()).with_skills(skills.iter().copied())
}

/// Create a task requiring the given skills.
pub fn task(id: &str, skills: &[&str]) -> Task {
    Task::new(id, &format!("{} title", id)).with_skills(skills.iter().copied())
}

/// Create `count` independent tasks named `task-0`, `task-1`, ...
pub fn independent_tasks(count: usize) -> Vec<Task> {
    (0..count).map(|i| task(&format!("task-{}", i), &[])).collect()
}

/// Create a chain `task-0 <- task-1 <- ... <- task-(count-1)`.
pub fn chain_tasks(count: usize) -> Vec<Task> {
    (0..count)
        .map(|i| {
            let t = task(&format!("task-{}", i), &[]);
            if i == 0 {
                t
            } else {
                t.with_dependencies([format!("task-{}", i - 1).as_str()])
            }
        })
        .collect()
}

/// Create a diamond: A, B -> C
///
/// ```text
///   A
///    \
///     C
///    /
///   B
/// ```
pub fn diamond_tasks() -> Vec<Task> {
    vec![
        task("A", &[]),
        task("B", &[]),
        task("C", &[]).with_dependencies(["A", "B"]),
    ]
}

/// The backlog used by the dependency scenario: T1, T2 (after T1), T3.
pub fn dependency_scenario() -> Vec<Task> {
    vec![
        task("T1", &[]),
        task("T2", &[]).with_dependencies(["T1"]),
        task("T3", &[]),
    ]
}

pub fn config(max_active_tasks: usize) -> OrchestrationConfig {
    OrchestrationConfig {
        max_active_tasks,
        ..OrchestrationConfig::default()
    }
}

pub fn team(config: OrchestrationConfig, agents: Vec<Agent>, tasks: Vec<Task>) -> Team {
    team_with_objectives(config, agents, tasks, Vec::new())
}

pub fn team_with_objectives(
    config: OrchestrationConfig,
    agents: Vec<Agent>,
    tasks: Vec<Task>,
    objectives: Vec<Objective>,
) -> Team {
    Team {
        name: "fixture".to_string(),
        config,
        agents,
        tasks,
        objectives,
    }
}

pub fn ids(list: &[TaskId]) -> Vec<&str> {
    list.iter().map(TaskId::as_str).collect()
}

/// Drives an orchestrator cycle by cycle, standing in for workers.
pub struct PlanningHarness {
    pub orchestrator: Orchestrator,
}

impl PlanningHarness {
    pub fn new(team: Team) -> Self {
        let strategies = Strategies::from_config(&team.config, None).unwrap();
        Self::with_strategies(team, strategies)
    }

    pub fn with_strategies(team: Team, strategies: Strategies) -> Self {
        Self {
            orchestrator: Orchestrator::from_team(team, strategies).unwrap(),
        }
    }

    /// Plan and commit one cycle.
    pub fn cycle(&mut self) -> PlanningCycle {
        let cycle = self.orchestrator.plan();
        self.orchestrator.commit(cycle).unwrap()
    }

    /// Complete an assigned task and release its agent.
    pub fn complete(&mut self, id: &str) {
        let id = TaskId::from(id);
        let (repo, registry) = self.orchestrator.stores_mut();
        let agent = repo.get(&id).unwrap().agent_id.clone().unwrap();
        repo.mark_running(&id).unwrap();
        repo.mark_completed(&id, "done").unwrap();
        registry.release(&agent).unwrap();
    }

    /// Complete every task currently in flight.
    pub fn complete_all_in_flight(&mut self) -> Vec<TaskId> {
        let in_flight = self.orchestrator.repository().in_flight_ids();
        for id in &in_flight {
            self.complete(id.as_str());
        }
        in_flight
    }
}

/// Run a team to the end on `executor`.
pub async fn run(team: Team, executor: Arc<ScriptedExecutor>) -> RunReport {
    let strategies = Strategies::from_config(&team.config, None).unwrap();
    Conductor::new(team, strategies, executor)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap()
}

pub fn executor() -> Arc<ScriptedExecutor> {
    Arc::new(ScriptedExecutor::new(TICK))
}
