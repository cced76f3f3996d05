//! Execution and recovery tests.
//!
//! These tests verify the retry policy, idempotent completion, event-driven
//! re-planning and cancellation. Runs use tokio's paused clock so scripted
//! task durations are exact.

use std::sync::Arc;
use std::time::Duration;

use conductor::core::{Agent, CompletionOutcome, TaskId, TaskStatus};
use conductor::orchestration::{
    Conductor, ExecutionCoordinator, OrchestrationEvent, RetryDecision, ScriptedExecutor,
    Strategies,
};
use tokio_util::sync::CancellationToken;

use crate::fixtures::{config, executor, ids, run, task, team, PlanningHarness, TICK};

fn agents_called(executor: &ScriptedExecutor, task_id: &str) -> Vec<String> {
    executor
        .calls()
        .into_iter()
        .filter(|(id, _)| id.as_str() == task_id)
        .map(|(_, agent)| agent.to_string())
        .collect()
}

fn assignments(report: &conductor::RunReport) -> Vec<(u64, String, String)> {
    report
        .events_named("task-assigned")
        .filter_map(|e| match e {
            OrchestrationEvent::TaskAssigned {
                cycle_id,
                assignment,
            } => Some((
                *cycle_id,
                assignment.task_id.to_string(),
                assignment.agent_id.to_string(),
            )),
            _ => None,
        })
        .collect()
}

/// Test: Retry, then reassign, then block
/// Given a task that always fails and two qualified agents
/// When the run executes
/// Then the task is retried on its agent, moved to the other, retried there
/// And finally blocked together with its dependent
/// And the move to the second agent is announced as an assignment
#[tokio::test(start_paused = true)]
async fn test_retry_then_reassign_then_block() {
    let executor = Arc::new(ScriptedExecutor::new(TICK).fail_times("T1", 10));
    let report = run(
        team(
            config(4),
            vec![Agent::new("a1", "Ada"), Agent::new("a2", "Bo")],
            vec![task("T1", &[]), task("T2", &[]).with_dependencies(["T1"])],
        ),
        executor.clone(),
    )
    .await;

    assert_eq!(agents_called(&executor, "T1"), vec!["a1", "a1", "a2", "a2"]);
    assert!(report.completed.is_empty());
    let blocked: Vec<&str> = report.blocked.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(blocked, vec!["T1", "T2"]);
    assert!(report.blocked[0].1.contains("scripted failure"));
    assert_eq!(report.events_named("task-retried").count(), 3);
    assert_eq!(report.events_named("task-failed").count(), 4);
    assert_eq!(report.events_named("task-blocked").count(), 2);
    let expected = vec![
        (1, "T1".to_string(), "a1".to_string()),
        (1, "T1".to_string(), "a2".to_string()),
    ];
    assert_eq!(assignments(&report), expected);
}

/// Test: A reassigned task is adapted for its new agent
/// Given an adaptable task with a skill gap that fails twice on Ada
/// When the retry policy moves it to Bo
/// Then it is adapted again from its original definition for Bo
/// And Ada's note does not carry over
#[tokio::test(start_paused = true)]
async fn test_reassigned_task_adapted_for_new_agent() {
    let executor = Arc::new(ScriptedExecutor::new(TICK).fail_times("T1", 2));
    let report = run(
        team(
            config(4),
            vec![
                Agent::new("a1", "Ada").with_skills(["writing"]),
                Agent::new("a2", "Bo").with_skills(["writing"]),
            ],
            vec![task("T1", &["writing", "sql"]).adaptable(true)],
        ),
        executor.clone(),
    )
    .await;

    assert_eq!(ids(&report.completed), vec!["T1"]);
    assert_eq!(agents_called(&executor, "T1"), vec!["a1", "a1", "a2"]);
    let notes: Vec<&str> = report
        .adaptations()
        .map(|r| r.after.description.as_str())
        .collect();
    assert_eq!(
        notes,
        vec![
            "Scoped for Ada: flag gaps in sql",
            "Scoped for Bo: flag gaps in sql"
        ]
    );
    let moved = report.adaptations().nth(1).unwrap();
    assert_eq!(moved.before.description, "");
    assert_eq!(report.events_named("task-adapted").count(), 2);
}

/// Test: A requeued task is adapted afresh on its next agent
/// Given Ada and Bo with one slot each, T0 on Ada and adaptable T1 on Bo
/// When T1 fails on Bo, waits for Ada, and is planned again once T0 completes
/// Then T1 carries only the note written for Ada
#[test]
fn test_requeued_task_adapted_afresh() {
    let mut cfg = config(4);
    cfg.max_retries = 0;
    let mut coordinator = ExecutionCoordinator::new(&cfg);
    let mut harness = PlanningHarness::new(team(
        cfg,
        vec![
            Agent::new("a1", "Ada").with_skills(["writing"]).with_capacity(1),
            Agent::new("a2", "Bo").with_skills(["writing"]).with_capacity(1),
        ],
        vec![
            task("T0", &["writing"]),
            task("T1", &["writing", "sql"]).adaptable(true),
        ],
    ));
    let t1 = TaskId::from("T1");

    let first = harness.cycle();
    assert_eq!(first.assigned_to(&"a2".into()), 1);
    assert!(harness.orchestrator.repository().get(&t1).unwrap().description.contains("Bo"));

    let (repo, registry) = harness.orchestrator.stores_mut();
    coordinator.start(repo, &t1).unwrap();
    let decision = coordinator.fail(repo, registry, &t1, "boom").unwrap();
    assert_eq!(decision, RetryDecision::Requeue);
    assert_eq!(repo.get(&t1).unwrap().description, "");
    harness.complete("T0");

    let second = harness.cycle();
    assert_eq!(ids(&second.selected), vec!["T1"]);
    let task = harness.orchestrator.repository().get(&t1).unwrap();
    assert_eq!(task.agent_id, Some("a1".into()));
    assert_eq!(task.description, "Scoped for Ada: flag gaps in sql");
    assert!(!task.description.contains("Bo"));
}

/// Test: A reassigned task can still succeed
#[tokio::test(start_paused = true)]
async fn test_reassigned_task_completes() {
    let executor = Arc::new(ScriptedExecutor::new(TICK).fail_times("T1", 2));
    let report = run(
        team(
            config(4),
            vec![Agent::new("a1", "Ada"), Agent::new("a2", "Bo")],
            vec![task("T1", &[])],
        ),
        executor.clone(),
    )
    .await;

    assert_eq!(ids(&report.completed), vec!["T1"]);
    assert_eq!(agents_called(&executor, "T1"), vec!["a1", "a1", "a2"]);
    let retried: Vec<u32> = report
        .events_named("task-retried")
        .filter_map(|e| match e {
            OrchestrationEvent::TaskRetried { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retried, vec![2, 3]);
}

/// Test: Requeue while the only untried agent is busy
/// Given no same-agent retries and a second agent busy with a long task
/// When the first task fails
/// Then it waits for the second agent instead of being blocked
#[tokio::test(start_paused = true)]
async fn test_requeue_until_untried_agent_frees_up() {
    let executor = Arc::new(ScriptedExecutor::new(TICK).fail_times("T1", 1));
    let mut cfg = config(4);
    cfg.max_retries = 0;
    let report = run(
        team(
            cfg,
            vec![
                Agent::new("a1", "Ada").with_capacity(1),
                Agent::new("a2", "Bo").with_capacity(1),
            ],
            vec![task("T1", &[]), task("T2", &[]).with_effort(5)],
        ),
        executor.clone(),
    )
    .await;

    assert_eq!(ids(&report.completed), vec!["T1", "T2"]);
    assert_eq!(agents_called(&executor, "T1"), vec!["a1", "a2"]);
    assert_eq!(report.events_named("task-requeued").count(), 1);
    assert!(report.blocked.is_empty());
}

/// Test: Replaying a completion changes nothing
/// Given a task completed once
/// When its completion is applied again
/// Then the outcome is Duplicate, agent load is unchanged and no cycle is added
#[test]
fn test_duplicate_completion_is_idempotent() {
    let cfg = config(2);
    let mut coordinator = ExecutionCoordinator::new(&cfg);
    let mut harness = PlanningHarness::new(team(
        cfg,
        vec![Agent::new("a1", "Ada")],
        vec![task("T1", &[]), task("T2", &[])],
    ));
    harness.cycle();
    let t1 = TaskId::from("T1");

    let (repo, registry) = harness.orchestrator.stores_mut();
    coordinator.start(repo, &t1).unwrap();
    let first = coordinator.complete(repo, registry, &t1, "ok").unwrap();
    assert_eq!(first, CompletionOutcome::Completed);
    let load = registry.load_of(&"a1".into()).unwrap();
    let stats = registry.stats(&"a1".into()).unwrap();

    let again = coordinator.complete(repo, registry, &t1, "ok again").unwrap();
    assert_eq!(again, CompletionOutcome::Duplicate);
    assert_eq!(registry.load_of(&"a1".into()).unwrap(), load);
    assert_eq!(registry.stats(&"a1".into()).unwrap(), stats);
    assert_eq!(repo.output(&t1), Some("ok"));
    assert_eq!(harness.orchestrator.history().len(), 1);
}

/// Test: Cancelling releases every unit of capacity
#[test]
fn test_cancel_all_releases_capacity() {
    let cfg = config(3);
    let mut coordinator = ExecutionCoordinator::new(&cfg);
    let mut harness = PlanningHarness::new(team(
        cfg,
        vec![Agent::new("a1", "Ada"), Agent::new("a2", "Bo")],
        vec![task("T1", &[]), task("T2", &[]), task("T3", &[])],
    ));
    harness.cycle();
    assert_eq!(harness.orchestrator.registry().total_load(), 3);

    let (repo, registry) = harness.orchestrator.stores_mut();
    coordinator.start(repo, &"T1".into()).unwrap();
    let cancelled = coordinator.cancel_all(repo, registry);
    assert_eq!(cancelled.len(), 3);
    assert_eq!(registry.total_load(), 0);
    for task in repo.tasks() {
        assert_eq!(
            task.status,
            TaskStatus::Failed {
                error: "cancelled".to_string()
            }
        );
    }
}

/// Test: Cancelling a run mid-flight
/// Given a continuous run with slow tasks
/// When the token is cancelled
/// Then every in-flight task fails as cancelled and the run reports it
#[tokio::test(start_paused = true)]
async fn test_cancel_running_team() {
    let executor = Arc::new(ScriptedExecutor::new(Duration::from_secs(30)));
    let mut cfg = config(2);
    cfg.continuous = true;
    let team = team(
        cfg,
        vec![Agent::new("a1", "Ada")],
        vec![task("T1", &[]), task("T2", &[]), task("T3", &[])],
    );
    let strategies = Strategies::from_config(&team.config, None).unwrap();
    let conductor = Conductor::new(team, strategies, executor).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });
    let report = conductor.run(cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(ids(&report.failed), vec!["T1", "T2"]);
    assert_eq!(ids(&report.unplanned), vec!["T3"]);
    let cancelled = report
        .events_named("task-failed")
        .filter(|e| matches!(e, OrchestrationEvent::TaskFailed { error, .. } if error == "cancelled"))
        .count();
    assert_eq!(cancelled, 2);
    assert_eq!(report.events.last().map(|e| e.name()), Some("run-finished"));
}

/// Test: Completions close together trigger a single re-plan
/// Given a continuous run where two parents finish within one replan interval
/// When the interval elapses
/// Then one cycle selects their common dependent
#[tokio::test(start_paused = true)]
async fn test_continuous_run_coalesces_events() {
    let mut cfg = config(3);
    cfg.continuous = true;
    cfg.min_replan_interval = Duration::from_millis(250);
    let report = run(
        team(
            cfg,
            vec![Agent::new("a1", "Ada")],
            vec![
                task("T1", &[]),
                task("T2", &[]).with_effort(2),
                task("T3", &[]).with_effort(30),
                task("T4", &[]).with_dependencies(["T1", "T2"]),
            ],
        ),
        executor(),
    )
    .await;

    assert_eq!(report.cycles.len(), 2);
    assert_eq!(ids(&report.cycles[0].selected), vec!["T1", "T2", "T3"]);
    assert_eq!(ids(&report.cycles[1].selected), vec!["T4"]);
    assert_eq!(report.completed.len(), 4);
}

/// Test: A task no agent qualifies for is blocked after N cycles
/// Given a skill threshold no agent meets for T1 and a dependent T2
/// When a continuous run re-plans
/// Then T1 and T2 are blocked after three unassigned cycles
/// And the run still completes the work it can
#[tokio::test(start_paused = true)]
async fn test_unassignable_task_blocked_in_run() {
    let mut cfg = config(2);
    cfg.continuous = true;
    cfg.min_skill_match = 0.5;
    cfg.max_unassigned_cycles = 3;
    let report = run(
        team(
            cfg,
            vec![Agent::new("a1", "Ada").with_skills(["writing"])],
            vec![
                task("T1", &["sql"]),
                task("T2", &["writing"]).with_dependencies(["T1"]),
                task("T3", &["writing"]),
            ],
        ),
        executor(),
    )
    .await;

    assert_eq!(ids(&report.completed), vec!["T3"]);
    assert_eq!(report.cycles.len(), 3);
    let blocked: Vec<(&str, &str)> = report
        .blocked
        .iter()
        .map(|(id, reason)| (id.as_str(), reason.as_str()))
        .collect();
    assert_eq!(
        blocked,
        vec![
            ("T1", "no capable agent after 3 cycles"),
            ("T2", "dependency T1 is blocked"),
        ]
    );
    assert_eq!(report.events_named("task-blocked").count(), 2);
}
