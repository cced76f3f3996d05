//! Declarative team descriptors.
//!
//! A descriptor lists the agents, the backlog and the orchestration
//! settings of one run. It is parsed from JSON or TOML and validated as a
//! whole before any orchestration state is built, so a malformed team is
//! rejected up front with a `Configuration` error.
//!
//! ```json
//! {
//!   "name": "research",
//!   "agents": [{ "id": "ada", "name": "Ada", "skills": ["research"] }],
//!   "tasks": [{ "id": "T1", "title": "Survey", "requiredSkills": ["research"] }],
//!   "orchestration": { "mode": "adaptive", "maxActiveTasks": 2 }
//! }
//! ```

use crate::config::{Config, OrchestrationConfig, OrchestrationSection};
use crate::core::{is_valid_id, Agent, Availability, DependencyGraph, Task};
use crate::error::{Error, Result};
use crate::orchestration::Objective;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

fn default_true() -> bool {
    true
}

fn default_effort() -> u32 {
    1
}

/// An agent as declared in a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default = "default_true")]
    pub available: bool,
}

/// A backlog task as declared in a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskSpec {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub required_skills: BTreeSet<String>,
    #[serde(default = "default_effort")]
    pub estimated_effort: u32,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub dynamic_priority: bool,
    #[serde(default)]
    pub adaptable: bool,
    #[serde(default)]
    pub split_compatible: bool,
    #[serde(default)]
    pub merge_compatible: bool,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub resource_requirements: BTreeMap<String, String>,
}

/// A high-priority need the orchestrator may generate tasks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ObjectiveSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_skills: BTreeSet<String>,
    #[serde(default)]
    pub priority: i32,
}

/// The input of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TeamDescriptor {
    pub name: String,
    pub agents: Vec<AgentSpec>,
    #[serde(default, alias = "backlogTasks")]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub objectives: Vec<ObjectiveSpec>,
    #[serde(default, alias = "orchestrationConfig")]
    pub orchestration: OrchestrationSection,
}

/// A validated team, ready to build an orchestrator from.
#[derive(Debug, Clone)]
pub struct Team {
    pub name: String,
    pub config: OrchestrationConfig,
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
    pub objectives: Vec<Objective>,
}

impl TeamDescriptor {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| Error::Configuration(format!("Invalid team descriptor: {}", e)))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| Error::Configuration(format!("Invalid team descriptor: {}", e)))
    }

    /// Load a descriptor, choosing the format by file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            Some("json") => Self::from_json_str(&contents),
            other => Err(Error::Configuration(format!(
                "Unsupported descriptor format {:?} for {}; use .json or .toml",
                other.unwrap_or(""),
                path.display()
            ))),
        }
    }

    /// Check the descriptor as a whole.
    ///
    /// # Errors
    /// `Configuration` naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("team name must not be empty"));
        }
        if self.agents.is_empty() {
            return Err(invalid("team must declare at least one agent"));
        }

        let mut agent_ids = HashSet::new();
        for agent in &self.agents {
            if !is_valid_id(&agent.id) {
                return Err(invalid(format!("invalid agent id '{}'", agent.id)));
            }
            if !agent_ids.insert(agent.id.as_str()) {
                return Err(invalid(format!("duplicate agent id '{}'", agent.id)));
            }
            if agent.max_concurrent == Some(0) {
                return Err(invalid(format!(
                    "agent '{}' must accept at least one task",
                    agent.id
                )));
            }
        }

        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            if !is_valid_id(&task.id) {
                return Err(invalid(format!("invalid task id '{}'", task.id)));
            }
            if !task_ids.insert(task.id.as_str()) {
                return Err(invalid(format!("duplicate task id '{}'", task.id)));
            }
            if task.title.trim().is_empty() {
                return Err(invalid(format!("task '{}' has an empty title", task.id)));
            }
        }
        let tasks = self.tasks();
        DependencyGraph::from_tasks(&tasks).map_err(|e| match e {
            Error::Validation(msg) => Error::Configuration(msg),
            other => other,
        })?;

        let mut objective_names = HashSet::new();
        for objective in &self.objectives {
            if objective.name.trim().is_empty() {
                return Err(invalid("objective name must not be empty"));
            }
            if !objective_names.insert(objective.name.as_str()) {
                return Err(invalid(format!(
                    "duplicate objective '{}'",
                    objective.name
                )));
            }
        }
        Ok(())
    }

    /// Validate and resolve into a [`Team`], filling unset tuning values
    /// from `defaults`.
    pub fn build(&self, defaults: &Config) -> Result<Team> {
        self.validate()?;
        let config = OrchestrationConfig::resolve(&self.orchestration, defaults)?;
        Ok(Team {
            name: self.name.clone(),
            config,
            agents: self.agents(),
            tasks: self.tasks(),
            objectives: self.objectives(),
        })
    }

    fn agents(&self) -> Vec<Agent> {
        self.agents
            .iter()
            .map(|spec| {
                let mut agent = Agent::new(spec.id.as_str(), &spec.name).with_skills(spec.skills.clone());
                agent.role = spec.role.clone();
                agent.max_concurrent = spec.max_concurrent;
                if !spec.available {
                    agent.availability = Availability::Offline;
                }
                agent
            })
            .collect()
    }

    fn tasks(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .map(|spec| {
                let mut task = Task::new(spec.id.as_str(), &spec.title)
                    .with_description(&spec.description)
                    .with_skills(spec.required_skills.clone())
                    .with_dependencies(spec.dependencies.iter().map(String::as_str))
                    .with_priority(spec.priority)
                    .with_effort(spec.estimated_effort)
                    .adaptable(spec.adaptable);
                task.expected_output = spec.expected_output.clone();
                task.dynamic_priority = spec.dynamic_priority;
                task.split_compatible = spec.split_compatible;
                task.merge_compatible = spec.merge_compatible;
                task.objective = spec.objective.clone();
                task.resources = spec.resource_requirements.clone();
                task
            })
            .collect()
    }

    fn objectives(&self) -> Vec<Objective> {
        self.objectives
            .iter()
            .map(|spec| {
                let mut objective = Objective::new(&spec.name, spec.priority)
                    .with_skills(spec.required_skills.clone());
                objective.description = spec.description.clone();
                objective
            })
            .collect()
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Configuration(msg.into())
}
