//! Agent registry for capacity and capability tracking.
//!
//! The `AgentRegistry` holds every agent registered for a run together
//! with its load counter and outcome statistics. Capacity counters are
//! the only mutable state shared with execution; the single writer of a
//! run mutates them through `reserve` and `release`.

use crate::core::agent::{Agent, AgentId};
use crate::core::task::Task;
use crate::error::{Error, Result};
use crate::{clog_debug, clog_warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Observed status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Has remaining capacity.
    Available,
    /// At capacity.
    Busy,
    /// Takes no new work.
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Available => write!(f, "available"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Execution outcomes observed for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub completed: u32,
    pub failed: u32,
}

impl AgentStats {
    /// Fraction of attempts that failed, 0.0 with no history.
    pub fn failure_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            0.0
        } else {
            f64::from(self.failed) / f64::from(total)
        }
    }
}

/// An agent that meets the skill threshold for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCandidate {
    pub agent_id: AgentId,
    /// Skill match score in [0, 1].
    pub score: f64,
    /// Current load, including reservations not yet committed.
    pub load: usize,
    /// Remaining capacity after those reservations.
    pub remaining: usize,
    /// Registration position, used as the final tie-breaker.
    pub order: usize,
}

impl AgentCandidate {
    pub fn has_capacity(&self) -> bool {
        self.remaining > 0
    }
}

/// Jaccard similarity between two skill sets. Two empty sets match fully.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

#[derive(Debug, Clone)]
struct Slot {
    agent: Agent,
    capacity: usize,
    load: usize,
    stats: AgentStats,
}

impl Slot {
    fn remaining(&self) -> usize {
        if self.agent.is_available() {
            self.capacity.saturating_sub(self.load)
        } else {
            0
        }
    }
}

/// Registered agents in registration order.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    slots: Vec<Slot>,
    index: HashMap<AgentId, usize>,
    /// Capacity for agents that declare no limit of their own.
    default_capacity: usize,
}

impl AgentRegistry {
    /// Create an empty registry.
    ///
    /// `default_capacity` bounds agents without a `max_concurrent` of their
    /// own; runs pass their active-task cap.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            default_capacity,
        }
    }

    pub fn from_agents(agents: Vec<Agent>, default_capacity: usize) -> Result<Self> {
        let mut registry = Self::new(default_capacity);
        for agent in agents {
            registry.register(agent)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, agent: Agent) -> Result<()> {
        if self.index.contains_key(&agent.id) {
            return Err(Error::DuplicateAgent(agent.id));
        }
        let capacity = agent.max_concurrent.unwrap_or(self.default_capacity);
        clog_debug!("Agent registered: {} (capacity {})", agent.id, capacity);
        self.index.insert(agent.id.clone(), self.slots.len());
        self.slots.push(Slot {
            agent,
            capacity,
            load: 0,
            stats: AgentStats::default(),
        });
        Ok(())
    }

    fn slot(&self, id: &AgentId) -> Result<&Slot> {
        self.index
            .get(id)
            .map(|&i| &self.slots[i])
            .ok_or_else(|| Error::AgentNotFound(id.clone()))
    }

    fn slot_mut(&mut self, id: &AgentId) -> Result<&mut Slot> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.slots[i]),
            None => Err(Error::AgentNotFound(id.clone())),
        }
    }

    /// Agents in registration order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.slots.iter().map(|s| &s.agent)
    }

    pub fn get(&self, id: &AgentId) -> Option<&Agent> {
        self.slot(id).ok().map(|s| &s.agent)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Remaining capacity; zero for offline agents.
    pub fn capacity_of(&self, id: &AgentId) -> Result<usize> {
        Ok(self.slot(id)?.remaining())
    }

    /// Configured maximum concurrent tasks.
    pub fn max_capacity_of(&self, id: &AgentId) -> Result<usize> {
        Ok(self.slot(id)?.capacity)
    }

    pub fn load_of(&self, id: &AgentId) -> Result<usize> {
        Ok(self.slot(id)?.load)
    }

    pub fn status_of(&self, id: &AgentId) -> Result<AgentStatus> {
        let slot = self.slot(id)?;
        Ok(if !slot.agent.is_available() {
            AgentStatus::Offline
        } else if slot.remaining() == 0 {
            AgentStatus::Busy
        } else {
            AgentStatus::Available
        })
    }

    pub fn stats(&self, id: &AgentId) -> Result<AgentStats> {
        Ok(self.slot(id)?.stats)
    }

    /// Sum of remaining capacity over all agents.
    pub fn total_remaining(&self) -> usize {
        self.slots.iter().map(Slot::remaining).sum()
    }

    /// Sum of current load over all agents.
    pub fn total_load(&self) -> usize {
        self.slots.iter().map(|s| s.load).sum()
    }

    /// Take one unit of capacity.
    pub fn reserve(&mut self, id: &AgentId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.remaining() == 0 {
            return Err(Error::Validation(format!(
                "Agent {} has no remaining capacity ({}/{})",
                id, slot.load, slot.capacity
            )));
        }
        slot.load += 1;
        Ok(())
    }

    /// Return one unit of capacity.
    pub fn release(&mut self, id: &AgentId) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.load == 0 {
            clog_warn!("Release of agent {} with no load", id);
            return Ok(());
        }
        slot.load -= 1;
        Ok(())
    }

    /// Reset every load counter to zero.
    pub fn release_all(&mut self) {
        for slot in &mut self.slots {
            slot.load = 0;
        }
    }

    pub fn record_outcome(&mut self, id: &AgentId, success: bool) -> Result<()> {
        let stats = &mut self.slot_mut(id)?.stats;
        if success {
            stats.completed += 1;
        } else {
            stats.failed += 1;
        }
        Ok(())
    }

    /// Jaccard similarity between the agent's skills and `required`.
    pub fn skill_match(&self, id: &AgentId, required: &BTreeSet<String>) -> Result<f64> {
        Ok(jaccard(&self.slot(id)?.agent.skills, required))
    }

    /// Online agents whose skill match for `task` is at least `threshold`.
    ///
    /// Agents listed in the task's exclusions are skipped. `pending` holds
    /// reservations made earlier in the same planning pass and is added to
    /// each agent's load. The result is ordered by score descending, then
    /// load ascending, then registration order; saturated agents are
    /// included with `remaining == 0`.
    pub fn candidates(
        &self,
        task: &Task,
        threshold: f64,
        pending: &HashMap<AgentId, usize>,
    ) -> Vec<AgentCandidate> {
        let mut candidates: Vec<AgentCandidate> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.agent.is_available())
            .filter(|(_, slot)| !task.excluded_agents.contains(&slot.agent.id))
            .filter_map(|(order, slot)| {
                let score = jaccard(&slot.agent.skills, &task.required_skills);
                if score < threshold {
                    return None;
                }
                let reserved = pending.get(&slot.agent.id).copied().unwrap_or(0);
                Some(AgentCandidate {
                    agent_id: slot.agent.id.clone(),
                    score,
                    load: slot.load + reserved,
                    remaining: slot.remaining().saturating_sub(reserved),
                    order,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.load.cmp(&b.load))
                .then(a.order.cmp(&b.order))
        });
        candidates
    }
}
