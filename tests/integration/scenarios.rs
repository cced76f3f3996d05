//! Descriptor-driven scenarios.
//!
//! Each test starts from a team descriptor as a user would write it and runs
//! it end to end through [`Conductor::from_descriptor`].

use std::sync::Arc;

use conductor::config::Config;
use conductor::core::AgentId;
use conductor::orchestration::{Conductor, OrchestrationEvent, ScriptedExecutor};
use conductor::{Error, RunReport, TeamDescriptor};
use tokio_util::sync::CancellationToken;

use crate::fixtures::{ids, TICK};

async fn run_descriptor(json: &str, executor: Arc<ScriptedExecutor>) -> RunReport {
    let descriptor = TeamDescriptor::from_json_str(json).unwrap();
    Conductor::from_descriptor(&descriptor, &Config::default(), executor)
        .unwrap()
        .run(CancellationToken::new())
        .await
        .unwrap()
}

const DEPENDENCY_TEAM: &str = r#"{
    "name": "research",
    "agents": [{ "id": "ada", "name": "Ada", "skills": ["research"] }],
    "backlogTasks": [
        { "id": "T1", "title": "Collect sources", "requiredSkills": ["research"] },
        { "id": "T2", "title": "Summarize", "requiredSkills": ["research"], "dependencies": ["T1"] },
        { "id": "T3", "title": "Index", "requiredSkills": ["research"] }
    ],
    "orchestration": { "mode": "conservative", "maxActiveTasks": 2 }
}"#;

/// Test: Single-shot run of the dependency scenario
/// Given T1, T2 (after T1), T3 and continuous orchestration off
/// When the team runs
/// Then T1 and T3 complete and T2 is reported as never planned
#[tokio::test(start_paused = true)]
async fn test_single_shot_run() {
    let report = run_descriptor(DEPENDENCY_TEAM, Arc::new(ScriptedExecutor::new(TICK))).await;

    assert_eq!(report.team, "research");
    assert_eq!(report.cycles.len(), 1);
    assert_eq!(ids(&report.completed), vec!["T1", "T3"]);
    assert_eq!(ids(&report.unplanned), vec!["T2"]);
    assert!(!report.cancelled);
}

/// Test: Continuous run of the dependency scenario
/// Given the same team with continuous orchestration on
/// When the team runs
/// Then a second cycle picks up T2 once T1 completes
#[tokio::test(start_paused = true)]
async fn test_continuous_run_drains_backlog() {
    let json = DEPENDENCY_TEAM.replace(
        r#""maxActiveTasks": 2"#,
        r#""maxActiveTasks": 2, "continuousOrchestration": true, "minReplanIntervalMs": 20"#,
    );
    let report = run_descriptor(&json, Arc::new(ScriptedExecutor::new(TICK))).await;

    assert_eq!(report.cycles.len(), 2);
    assert_eq!(ids(&report.cycles[0].selected), vec!["T1", "T3"]);
    assert_eq!(ids(&report.cycles[1].selected), vec!["T2"]);
    assert_eq!(ids(&report.completed), vec!["T1", "T2", "T3"]);
    assert!(report.unplanned.is_empty());
}

/// Test: Non-adaptable tasks are never rewritten
/// Given innovative mode and an agent missing a skill every task needs
/// When the team runs
/// Then only the adaptable task carries an adaptation record
#[tokio::test(start_paused = true)]
async fn test_non_adaptable_tasks_never_rewritten() {
    let json = r#"{
        "name": "gaps",
        "agents": [{ "id": "ada", "name": "Ada", "skills": ["research"] }],
        "backlogTasks": [
            { "id": "T1", "title": "Query", "requiredSkills": ["research", "sql"], "adaptable": false },
            { "id": "T2", "title": "Model", "requiredSkills": ["research", "sql"], "adaptable": true },
            { "id": "T3", "title": "Report", "requiredSkills": ["research", "sql"],
              "dependencies": ["T1"] }
        ],
        "orchestration": { "mode": "innovative", "continuousOrchestration": true }
    }"#;
    let report = run_descriptor(json, Arc::new(ScriptedExecutor::new(TICK))).await;

    assert_eq!(report.completed.len(), 3);
    let adapted: Vec<&str> = report.adaptations().map(|r| r.task_id.as_str()).collect();
    assert_eq!(adapted, vec!["T2"]);
    let record = report.adaptations().next().unwrap();
    assert!(record.reason.contains("lacks sql"));
    assert_eq!(record.after.required_skills, record.before.required_skills);
    assert!(record.after.description.contains("Ada"));
    assert_eq!(report.events_named("task-adapted").count(), 1);
}

const OBJECTIVE_TEAM: &str = r#"{
    "name": "platform",
    "agents": [{ "id": "ada", "name": "Ada", "skills": ["research", "security"] }],
    "backlogTasks": [{ "id": "T1", "title": "Survey", "requiredSkills": ["research"] }],
    "objectives": [
        { "name": "security", "requiredSkills": ["security"], "priority": 9 },
        { "name": "docs", "requiredSkills": ["writing"], "priority": 4 }
    ],
    "orchestration": { "mode": "innovative", "allowTaskGeneration": GENERATION }
}"#;

/// Test: Generation stays off when the descriptor disallows it
#[tokio::test(start_paused = true)]
async fn test_generation_disallowed() {
    let json = OBJECTIVE_TEAM.replace("GENERATION", "false");
    let report = run_descriptor(&json, Arc::new(ScriptedExecutor::new(TICK))).await;

    assert_eq!(report.generations().count(), 0);
    assert_eq!(report.events_named("task-generated").count(), 0);
    assert_eq!(ids(&report.completed), vec!["T1"]);
}

/// Test: A generated task is planned and executed in the same run
/// Given an uncovered objective above the priority threshold
/// And one below it
/// When the team runs with generation allowed
/// Then exactly one task is generated, for the high-priority objective
/// And it is selected in the cycle that generated it and completes
#[tokio::test(start_paused = true)]
async fn test_generated_task_executes() {
    let json = OBJECTIVE_TEAM.replace("GENERATION", "true");
    let executor = Arc::new(ScriptedExecutor::new(TICK));
    let report = run_descriptor(&json, executor.clone()).await;

    let generated: Vec<(&str, &str)> = report
        .generations()
        .map(|g| (g.task_id.as_str(), g.objective.as_str()))
        .collect();
    assert_eq!(generated, vec![("gen-1-security", "security")]);
    assert!(report.cycles[0]
        .selected
        .iter()
        .any(|id| id.as_str() == "gen-1-security"));
    assert!(report
        .completed
        .iter()
        .any(|id| id.as_str() == "gen-1-security"));
    assert_eq!(executor.attempts(&"gen-1-security".into()), 1);
}

/// Test: Skills-based distribution routes work to specialists
#[tokio::test(start_paused = true)]
async fn test_skills_based_routes_to_specialists() {
    let json = r#"{
        "name": "data",
        "agents": [
            { "id": "analyst", "name": "Ann", "skills": ["sql"] },
            { "id": "writer", "name": "Wes", "skills": ["writing"] }
        ],
        "backlogTasks": [
            { "id": "Q1", "title": "Query one", "requiredSkills": ["sql"] },
            { "id": "W1", "title": "Draft one", "requiredSkills": ["writing"] },
            { "id": "Q2", "title": "Query two", "requiredSkills": ["sql"] },
            { "id": "W2", "title": "Draft two", "requiredSkills": ["writing"] }
        ],
        "orchestration": { "mode": "conservative", "workloadDistribution": "skills-based" }
    }"#;
    let executor = Arc::new(ScriptedExecutor::new(TICK));
    let report = run_descriptor(json, executor.clone()).await;

    assert_eq!(report.completed.len(), 4);
    for (task_id, agent_id) in executor.calls() {
        let expected = if task_id.as_str().starts_with('Q') {
            "analyst"
        } else {
            "writer"
        };
        assert_eq!(agent_id, AgentId::from(expected), "{} misrouted", task_id);
    }
}

/// Test: Balanced distribution spreads a cycle evenly
#[tokio::test(start_paused = true)]
async fn test_balanced_distribution_spreads_load() {
    let json = r#"{
        "name": "even",
        "agents": [
            { "id": "a", "name": "A" },
            { "id": "b", "name": "B" }
        ],
        "backlogTasks": [
            { "id": "T1", "title": "One" },
            { "id": "T2", "title": "Two" },
            { "id": "T3", "title": "Three" },
            { "id": "T4", "title": "Four" }
        ],
        "orchestration": { "workloadDistribution": "balanced" }
    }"#;
    let report = run_descriptor(json, Arc::new(ScriptedExecutor::new(TICK))).await;

    let cycle = &report.cycles[0];
    assert_eq!(cycle.assignments.len(), 4);
    assert_eq!(cycle.assigned_to(&"a".into()), 2);
    assert_eq!(cycle.assigned_to(&"b".into()), 2);
}

/// Test: AI-driven prioritization needs an injected ranker
#[test]
fn test_ai_driven_descriptor_rejected() {
    let json = DEPENDENCY_TEAM.replace(
        r#""maxActiveTasks": 2"#,
        r#""maxActiveTasks": 2, "taskPrioritization": "ai-driven""#,
    );
    let descriptor = TeamDescriptor::from_json_str(&json).unwrap();
    let result = Conductor::from_descriptor(
        &descriptor,
        &Config::default(),
        Arc::new(ScriptedExecutor::new(TICK)),
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}

/// Test: Events serialize with kebab-case type tags
/// Given a completed run
/// When its events are serialized
/// Then every event carries its name as the type tag
/// And the final event identifies the run
#[tokio::test(start_paused = true)]
async fn test_events_serialize_with_type_tags() {
    let report = run_descriptor(DEPENDENCY_TEAM, Arc::new(ScriptedExecutor::new(TICK))).await;

    for event in &report.events {
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value["type"], event.name());
    }
    match report.events.last() {
        Some(OrchestrationEvent::RunFinished {
            run_id,
            completed,
            unplanned,
            ..
        }) => {
            assert_eq!(*run_id, report.run_id);
            assert_eq!(*completed, 2);
            assert_eq!(*unplanned, 1);
        }
        other => panic!("Expected run-finished, got {:?}", other),
    }
}
