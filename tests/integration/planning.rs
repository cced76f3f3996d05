//! Planning cycle properties.
//!
//! These tests drive the orchestrator cycle by cycle, completing tasks by
//! hand between cycles, and check the guarantees every cycle must keep.

use std::collections::BTreeSet;
use std::sync::Arc;

use conductor::config::PrioritizationKind;
use conductor::core::{Agent, Task, TaskId};
use conductor::orchestration::{Strategies, TaskRanker};
use conductor::Error;

use crate::fixtures::{
    chain_tasks, config, dependency_scenario, diamond_tasks, ids, independent_tasks, task, team,
    PlanningHarness,
};

/// Test: Capacity is never exceeded
/// Given agents with mixed capacities and more tasks than slots
/// When cycles run until the backlog drains
/// Then no cycle gives an agent more than its remaining capacity
/// And in-flight tasks never exceed max active tasks
#[test]
fn test_capacity_never_exceeded_across_cycles() {
    let mut harness = PlanningHarness::new(team(
        config(4),
        vec![
            Agent::new("a1", "Ada").with_capacity(2),
            Agent::new("a2", "Bo").with_capacity(1),
            Agent::new("a3", "Cy"),
        ],
        independent_tasks(10),
    ));

    let mut cycles = 0;
    while !harness.orchestrator.repository().is_drained() {
        let cycle = harness.cycle();
        cycles += 1;
        let registry = harness.orchestrator.registry();
        for agent in registry.agents() {
            let load = registry.load_of(&agent.id).unwrap();
            let max = registry.max_capacity_of(&agent.id).unwrap();
            assert!(load <= max, "{} has load {} over {}", agent.id, load, max);
            assert!(cycle.assigned_to(&agent.id) <= max);
        }
        assert!(harness.orchestrator.repository().in_flight_count() <= 4);
        harness.complete_all_in_flight();
        assert!(cycles < 20, "backlog did not drain");
    }
    assert_eq!(harness.orchestrator.repository().completed_ids().len(), 10);
    assert_eq!(cycles, 3);
}

/// Test: Tasks with unmet dependencies are never selected
/// Given a chain of four tasks
/// When cycles run
/// Then each cycle selects only the next link
#[test]
fn test_unmet_dependencies_never_selected() {
    let mut harness = PlanningHarness::new(team(
        config(4),
        vec![Agent::new("a1", "Ada")],
        chain_tasks(4),
    ));

    for i in 0..4 {
        let completed: BTreeSet<TaskId> = harness
            .orchestrator
            .repository()
            .completed_ids()
            .clone();
        let cycle = harness.cycle();
        assert_eq!(ids(&cycle.selected), vec![format!("task-{}", i).as_str()]);
        for id in &cycle.selected {
            let task = harness.orchestrator.repository().get(id).unwrap();
            assert!(task.dependencies.is_subset(&completed));
        }
        harness.complete_all_in_flight();
    }
}

/// Test: Diamond join waits for both parents
#[test]
fn test_diamond_join_waits_for_both_parents() {
    let mut harness = PlanningHarness::new(team(
        config(1),
        vec![Agent::new("a1", "Ada")],
        diamond_tasks(),
    ));

    assert_eq!(ids(&harness.cycle().selected), vec!["A"]);
    harness.complete("A");
    assert_eq!(ids(&harness.cycle().selected), vec!["B"]);
    harness.complete("B");
    assert_eq!(ids(&harness.cycle().selected), vec!["C"]);
}

/// Test: Dependency scenario
/// Given T1, T2 (depends on T1), T3, one agent and max active tasks 2
/// When the first cycle runs
/// Then T1 and T3 are selected
/// And after T1 completes the second cycle selects T2
#[test]
fn test_dependency_scenario() {
    let mut harness = PlanningHarness::new(team(
        config(2),
        vec![Agent::new("a1", "Ada")],
        dependency_scenario(),
    ));

    let first = harness.cycle();
    assert_eq!(ids(&first.selected), vec!["T1", "T3"]);

    harness.complete("T1");
    let second = harness.cycle();
    assert_eq!(ids(&second.selected), vec!["T2"]);
    assert!(second.id > first.id);
}

/// Test: Static planning is deterministic
/// Given identical backlogs, agents and config
/// When plan runs repeatedly and on separate orchestrators
/// Then every cycle is equal
#[test]
fn test_static_planning_deterministic() {
    let build = || {
        PlanningHarness::new(team(
            config(3),
            vec![
                Agent::new("a1", "Ada").with_skills(["research"]),
                Agent::new("a2", "Bo").with_skills(["research", "writing"]),
            ],
            vec![
                task("T1", &["research"]),
                task("T2", &["writing"]),
                task("T3", &["research", "writing"]),
                task("T4", &[]),
            ],
        ))
    };
    let first = build();
    let second = build();

    let cycle = first.orchestrator.plan();
    assert_eq!(cycle, first.orchestrator.plan());
    assert_eq!(cycle, second.orchestrator.plan());
    assert_eq!(first.orchestrator.registry().total_load(), 0);
}

/// Test: A late cycle never overwrites a newer one
#[test]
fn test_late_cycle_discarded() {
    let mut harness = PlanningHarness::new(team(
        config(1),
        vec![Agent::new("a1", "Ada")],
        independent_tasks(2),
    ));
    let early = harness.orchestrator.plan();
    let late = harness.orchestrator.plan();
    let committed = harness.orchestrator.commit(early).unwrap();

    assert!(matches!(
        harness.orchestrator.commit(late),
        Err(Error::StaleCycle { .. })
    ));
    let assigned = harness.orchestrator.repository().in_flight_ids();
    assert_eq!(assigned, committed.selected);
    assert_eq!(harness.orchestrator.last_applied(), committed.id);
}

/// Test: Per-task dynamicPriority=false pins the static priority
/// Given dynamic prioritization with a large urgency bonus
/// When a pinned and an unpinned task have both waited
/// Then only the unpinned task gains urgency
#[test]
fn test_pinned_priority_under_dynamic_ranking() {
    let mut cfg = config(1);
    cfg.prioritization = PrioritizationKind::Dynamic;
    cfg.urgency_per_cycle = 10.0;
    let mut pinned = task("pinned", &[]).with_priority(5);
    pinned.dynamic_priority = false;
    let mut harness = PlanningHarness::new(team(
        cfg,
        vec![Agent::new("a1", "Ada")],
        vec![
            task("first", &[]).with_priority(9),
            pinned,
            task("floating", &[]).with_priority(1),
        ],
    ));

    assert_eq!(ids(&harness.cycle().selected), vec!["first"]);
    harness.complete("first");
    assert_eq!(ids(&harness.cycle().selected), vec!["floating"]);
}

struct ReverseRanker;

impl TaskRanker for ReverseRanker {
    fn rank(&self, tasks: &[&Task]) -> Vec<TaskId> {
        let mut ranked: Vec<TaskId> = tasks.iter().rev().map(|t| t.id.clone()).collect();
        ranked.insert(0, TaskId::from("ghost"));
        ranked.pop();
        ranked
    }
}

/// Test: AI-driven ranking uses the injected ranker, sanitized
/// Given a ranker that reverses the backlog, invents an id and omits one
/// When a cycle runs
/// Then the invented id is ignored and the omitted task is ranked last
#[test]
fn test_ai_driven_ranking_sanitized() {
    let mut cfg = config(3);
    cfg.prioritization = PrioritizationKind::AiDriven;
    let strategies = Strategies::from_config(&cfg, Some(Arc::new(ReverseRanker))).unwrap();
    let mut harness = PlanningHarness::with_strategies(
        team(
            cfg,
            vec![Agent::new("a1", "Ada")],
            vec![task("T1", &[]), task("T2", &[]), task("T3", &[])],
        ),
        strategies,
    );

    let cycle = harness.cycle();
    assert_eq!(ids(&cycle.selected), vec!["T3", "T2", "T1"]);
    assert!(!harness.orchestrator.repository().contains(&"ghost".into()));
}
