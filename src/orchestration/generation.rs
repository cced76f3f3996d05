//! Task generation for uncovered high-priority objectives.

use crate::core::{Task, TaskId, TaskSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A named need the team must address, declared in the team descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub name: String,
    pub description: String,
    pub required_skills: BTreeSet<String>,
    pub priority: i32,
}

impl Objective {
    pub fn new(name: &str, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            required_skills: BTreeSet::new(),
            priority,
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills = skills.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `task` addresses this objective.
    ///
    /// A task covers an objective when it names it explicitly, or when its
    /// required skills include every skill the objective needs. Objectives
    /// without skills are only covered by name.
    pub fn is_covered_by(&self, task: &Task) -> bool {
        if task.objective.as_deref() == Some(self.name.as_str()) {
            return true;
        }
        !self.required_skills.is_empty() && self.required_skills.is_subset(&task.required_skills)
    }
}

/// Audit record for a task synthesized during planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub task_id: TaskId,
    pub objective: String,
    pub reason: String,
    /// The synthesized task's definition.
    pub task: TaskSnapshot,
}

/// Synthesizes a task for an objective nothing in the backlog covers.
pub trait TaskGenerator: Send + Sync {
    /// Return a task definition for `objective`, or `None` to skip it.
    ///
    /// The returned id must be `id`; dependencies must be empty.
    fn generate(&self, objective: &Objective, id: TaskId) -> Option<TaskSnapshot>;
}

/// Turns an objective directly into a single task that requires its skills.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectiveGenerator;

impl TaskGenerator for ObjectiveGenerator {
    fn generate(&self, objective: &Objective, id: TaskId) -> Option<TaskSnapshot> {
        let description = if objective.description.is_empty() {
            format!("Address the '{}' objective", objective.name)
        } else {
            objective.description.clone()
        };
        Some(TaskSnapshot {
            id,
            title: format!("Address {}", objective.name),
            description,
            expected_output: format!("Work product that satisfies '{}'", objective.name),
            required_skills: objective.required_skills.clone(),
            estimated_effort: 1,
            dependencies: BTreeSet::new(),
            priority: objective.priority,
            dynamic_priority: true,
            adaptable: false,
            objective: Some(objective.name.clone()),
            resources: BTreeMap::new(),
        })
    }
}
