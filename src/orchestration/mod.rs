//! Orchestration layer: planning cycles, strategies, execution and the run loop.
//!
//! The [`Orchestrator`] computes and commits planning cycles over the task
//! repository and agent registry. The [`ExecutionCoordinator`] drives
//! assigned tasks through execution and applies the retry policy, and the
//! [`Conductor`] ties both to spawned workers and an event stream.

pub mod adaptation;
pub mod coordinator;
pub mod cycle;
pub mod events;
pub mod executor;
pub mod generation;
pub mod orchestrator;
pub mod runtime;
pub mod strategy;

pub use adaptation::{Adaptation, AdaptationContext, AdaptationRecord, HeuristicAdapter, TaskAdapter};
pub use coordinator::{ExecutionCoordinator, RetryDecision, RetryTracker};
pub use cycle::{Assignment, PlanningCycle};
pub use events::OrchestrationEvent;
pub use executor::{ScriptedExecutor, TaskExecutor, TaskOutput};
pub use generation::{GenerationRecord, Objective, ObjectiveGenerator, TaskGenerator};
pub use orchestrator::{Orchestrator, OrchestratorState, StateHistoryEntry, Strategies};
pub use runtime::{Conductor, ExecutionEvent, RunReport};
pub use strategy::{
    distributor_for, prioritizer_for, AiDrivenPrioritizer, AvailabilityDistributor,
    BalancedDistributor, Distributor, DynamicPrioritizer, Prioritizer, RankedTask,
    SkillsBasedDistributor, StaticPrioritizer, TaskRanker,
};
