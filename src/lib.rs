pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod team;

pub use config::{Config, Mode, OrchestrationConfig};
pub use error::{Error, Result};
pub use orchestration::{Conductor, OrchestrationEvent, Orchestrator, PlanningCycle, RunReport};
pub use team::{Team, TeamDescriptor};
