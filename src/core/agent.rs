//! Agent capability profiles.

use crate::core::task::is_valid_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique identifier for an agent within a team.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if is_valid_id(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(format!("invalid agent id '{}'", s))
        }
    }
}

/// Whether an agent takes new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    #[default]
    Available,
    /// Registered but never assigned new tasks.
    Offline,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::Available => write!(f, "available"),
            Availability::Offline => write!(f, "offline"),
        }
    }
}

/// An agent registered with the team.
///
/// Load is not stored here; the registry owns the mutable counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub role: String,
    pub skills: BTreeSet<String>,
    /// Maximum concurrent tasks; `None` means bounded only by the run's active-task cap.
    pub max_concurrent: Option<usize>,
    pub availability: Availability,
}

impl Agent {
    pub fn new(id: impl Into<AgentId>, name: &str) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            role: String::new(),
            skills: BTreeSet::new(),
            max_concurrent: None,
            availability: Availability::Available,
        }
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capacity(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn offline(mut self) -> Self {
        self.availability = Availability::Offline;
        self
    }

    pub fn is_available(&self) -> bool {
        self.availability == Availability::Available
    }

    /// Required skills this agent lacks.
    pub fn missing_skills<'a>(&self, required: &'a BTreeSet<String>) -> Vec<&'a str> {
        required
            .iter()
            .filter(|skill| !self.skills.contains(*skill))
            .map(String::as_str)
            .collect()
    }
}
