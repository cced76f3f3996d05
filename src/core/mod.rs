//! Core domain models for conductor orchestration.
//!
//! This module contains the data structures the orchestrator plans over:
//! tasks and their dependency graph, agents, and the two stores that own
//! their mutable state during a run.

pub mod agent;
pub mod dag;
pub mod registry;
pub mod repository;
pub mod task;

pub use agent::{Agent, AgentId, Availability};
pub use dag::DependencyGraph;
pub use registry::{jaccard, AgentCandidate, AgentRegistry, AgentStats, AgentStatus};
pub use repository::{CompletionOutcome, TaskRepository};
pub use task::{is_valid_id, Task, TaskId, TaskSnapshot, TaskStatus};
