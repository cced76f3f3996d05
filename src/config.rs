use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{clog_debug, Error, Result};

/// Default minimum skill-match score an agent needs to be considered.
pub const DEFAULT_MIN_SKILL_MATCH: f64 = 0.0;

/// Default number of consecutive unassigned cycles before a task is blocked.
pub const DEFAULT_MAX_UNASSIGNED_CYCLES: u32 = 3;

/// Default minimum interval between two planning cycles in continuous mode.
pub const DEFAULT_MIN_REPLAN_INTERVAL_MS: u64 = 250;

/// Default number of retries on the same agent before reassignment.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Default urgency added per waited cycle under dynamic prioritization.
pub const DEFAULT_URGENCY_PER_CYCLE: f64 = 1.0;

/// Default priority at or above which an objective counts as high priority.
pub const DEFAULT_HIGH_PRIORITY_THRESHOLD: i32 = 5;

/// Default capacity of the orchestration event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Engine tuning defaults, loaded from `~/.conductor/conductor.toml`.
///
/// Every value can be overridden per run by the team descriptor's
/// `orchestration` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub min_skill_match: f64,
    pub max_unassigned_cycles: u32,
    pub min_replan_interval_ms: u64,
    pub max_retries: u32,
    pub urgency_per_cycle: f64,
    pub high_priority_threshold: i32,
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_skill_match: DEFAULT_MIN_SKILL_MATCH,
            max_unassigned_cycles: DEFAULT_MAX_UNASSIGNED_CYCLES,
            min_replan_interval_ms: DEFAULT_MIN_REPLAN_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            urgency_per_cycle: DEFAULT_URGENCY_PER_CYCLE,
            high_priority_threshold: DEFAULT_HIGH_PRIORITY_THRESHOLD,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl Config {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit path; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        clog_debug!("Config loaded: {:?}", config);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        Self::ensure_dirs()?;
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        clog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let dir = Self::conductor_dir()?;
        if !dir.exists() {
            clog_debug!("Creating conductor directory: {}", dir.display());
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_skill_match) {
            return Err(Error::Configuration(format!(
                "min_skill_match must be within [0, 1], got {}",
                self.min_skill_match
            )));
        }
        if self.max_unassigned_cycles == 0 {
            return Err(Error::Configuration(
                "max_unassigned_cycles must be at least 1".to_string(),
            ));
        }
        if !(self.urgency_per_cycle.is_finite() && self.urgency_per_cycle >= 0.0) {
            return Err(Error::Configuration(format!(
                "urgency_per_cycle must be a finite, non-negative number, got {}",
                self.urgency_per_cycle
            )));
        }
        if self.event_buffer == 0 {
            return Err(Error::Configuration(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// How freely the orchestrator may reshape the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Tasks run exactly as declared.
    Conservative,
    /// Adaptable tasks may be rewritten before assignment.
    #[default]
    Adaptive,
    /// Adaptation plus task generation for uncovered objectives.
    Innovative,
    /// Adaptation informed by observed agent outcomes.
    Learning,
}

impl Mode {
    pub fn allows_adaptation(&self) -> bool {
        !matches!(self, Mode::Conservative)
    }

    pub fn allows_generation(&self) -> bool {
        !matches!(self, Mode::Conservative)
    }

    pub fn learns(&self) -> bool {
        matches!(self, Mode::Learning)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Conservative => write!(f, "conservative"),
            Mode::Adaptive => write!(f, "adaptive"),
            Mode::Innovative => write!(f, "innovative"),
            Mode::Learning => write!(f, "learning"),
        }
    }
}

/// Ranking strategy for eligible tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PrioritizationKind {
    #[default]
    Static,
    Dynamic,
    AiDriven,
}

impl std::fmt::Display for PrioritizationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrioritizationKind::Static => write!(f, "static"),
            PrioritizationKind::Dynamic => write!(f, "dynamic"),
            PrioritizationKind::AiDriven => write!(f, "ai-driven"),
        }
    }
}

/// Agent selection strategy for each selected task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionKind {
    #[default]
    SkillsBased,
    Balanced,
    Availability,
}

impl std::fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionKind::SkillsBased => write!(f, "skills-based"),
            DistributionKind::Balanced => write!(f, "balanced"),
            DistributionKind::Availability => write!(f, "availability"),
        }
    }
}

/// The `orchestration` section of a team descriptor as written by users.
///
/// Absent tuning values fall back to [`Config`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct OrchestrationSection {
    pub mode: Mode,
    pub continuous_orchestration: bool,
    pub max_active_tasks: Option<usize>,
    pub task_prioritization: PrioritizationKind,
    pub workload_distribution: DistributionKind,
    pub allow_task_generation: bool,
    pub min_skill_match: Option<f64>,
    pub max_unassigned_cycles: Option<u32>,
    pub min_replan_interval_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub urgency_per_cycle: Option<f64>,
    pub high_priority_threshold: Option<i32>,
}

/// Default number of concurrently active tasks when a descriptor omits it.
pub const DEFAULT_MAX_ACTIVE_TASKS: usize = 4;

/// Immutable per-run orchestration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub mode: Mode,
    pub continuous: bool,
    pub max_active_tasks: usize,
    pub prioritization: PrioritizationKind,
    pub distribution: DistributionKind,
    pub allow_task_generation: bool,
    pub min_skill_match: f64,
    pub max_unassigned_cycles: u32,
    pub min_replan_interval: Duration,
    pub max_retries: u32,
    pub urgency_per_cycle: f64,
    pub high_priority_threshold: i32,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        let tuning = Config::default();
        Self {
            mode: Mode::default(),
            continuous: false,
            max_active_tasks: DEFAULT_MAX_ACTIVE_TASKS,
            prioritization: PrioritizationKind::default(),
            distribution: DistributionKind::default(),
            allow_task_generation: false,
            min_skill_match: tuning.min_skill_match,
            max_unassigned_cycles: tuning.max_unassigned_cycles,
            min_replan_interval: Duration::from_millis(tuning.min_replan_interval_ms),
            max_retries: tuning.max_retries,
            urgency_per_cycle: tuning.urgency_per_cycle,
            high_priority_threshold: tuning.high_priority_threshold,
        }
    }
}

impl OrchestrationConfig {
    /// Merge a descriptor section over engine defaults and validate the result.
    pub fn resolve(section: &OrchestrationSection, defaults: &Config) -> Result<Self> {
        let tuning = Config {
            min_skill_match: section.min_skill_match.unwrap_or(defaults.min_skill_match),
            max_unassigned_cycles: section
                .max_unassigned_cycles
                .unwrap_or(defaults.max_unassigned_cycles),
            min_replan_interval_ms: section
                .min_replan_interval_ms
                .unwrap_or(defaults.min_replan_interval_ms),
            max_retries: section.max_retries.unwrap_or(defaults.max_retries),
            urgency_per_cycle: section
                .urgency_per_cycle
                .unwrap_or(defaults.urgency_per_cycle),
            high_priority_threshold: section
                .high_priority_threshold
                .unwrap_or(defaults.high_priority_threshold),
            event_buffer: defaults.event_buffer,
        };
        tuning.validate()?;

        let max_active_tasks = section.max_active_tasks.unwrap_or(DEFAULT_MAX_ACTIVE_TASKS);
        if max_active_tasks == 0 {
            return Err(Error::Configuration(
                "maxActiveTasks must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            mode: section.mode,
            continuous: section.continuous_orchestration,
            max_active_tasks,
            prioritization: section.task_prioritization,
            distribution: section.workload_distribution,
            allow_task_generation: section.allow_task_generation,
            min_skill_match: tuning.min_skill_match,
            max_unassigned_cycles: tuning.max_unassigned_cycles,
            min_replan_interval: Duration::from_millis(tuning.min_replan_interval_ms),
            max_retries: tuning.max_retries,
            urgency_per_cycle: tuning.urgency_per_cycle,
            high_priority_threshold: tuning.high_priority_threshold,
        })
    }

    /// Whether adaptable tasks may be rewritten in this run.
    pub fn adaptation_enabled(&self) -> bool {
        self.mode.allows_adaptation()
    }

    /// Whether the orchestrator may synthesize new tasks in this run.
    ///
    /// Conservative mode never generates, even with `allowTaskGeneration` on.
    pub fn generation_enabled(&self) -> bool {
        self.allow_task_generation && self.mode.allows_generation()
    }
}
