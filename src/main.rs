use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use conductor::config::Config;
use conductor::orchestration::{Conductor, Orchestrator, RunReport, ScriptedExecutor, Strategies};
use conductor::{clog, Error, OrchestrationEvent, Result, TeamDescriptor};

/// Conductor - adaptive multi-agent task orchestrator
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    CONDUCTOR_DEBUG=1     Enable debug logging (alternative to --debug)\n    CONDUCTOR_LOG=LEVEL   Log threshold: error, warn, info, debug or trace"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.conductor/conductor.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Parse and validate a team descriptor
    Validate {
        /// Team descriptor (.json or .toml)
        file: PathBuf,
    },

    /// Print the first planning cycle for a team as JSON
    Plan {
        /// Team descriptor (.json or .toml)
        file: PathBuf,
    },

    /// Run a team with the scripted executor
    Run {
        /// Team descriptor (.json or .toml)
        file: PathBuf,

        /// Simulated duration of one unit of effort, in milliseconds
        #[arg(long, default_value_t = 100)]
        tick_ms: u64,

        /// Make TASK fail N times before succeeding (repeatable)
        #[arg(long = "fail", value_name = "TASK=N", value_parser = parse_failure)]
        failures: Vec<(String, u32)>,

        /// Print events and the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective engine configuration
    Config,
}

fn parse_failure(s: &str) -> std::result::Result<(String, u32), String> {
    let (task, times) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TASK=N, got '{}'", s))?;
    let times = times
        .parse()
        .map_err(|_| format!("invalid failure count '{}'", times))?;
    Ok((task.to_string(), times))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    conductor::log::init_with_debug(cli.debug);
    clog!("Conductor starting: {:?}", cli.command);

    match cli.command {
        Command::Validate { file } => run_validate(&file),
        Command::Plan { file } => run_plan(&file),
        Command::Run {
            file,
            tick_ms,
            failures,
            json,
        } => run_team(&file, tick_ms, failures, json),
        Command::Config => run_config(),
    }
}

fn run_validate(file: &Path) -> Result<()> {
    let descriptor = TeamDescriptor::load(file)?;
    let team = descriptor.build(&Config::load()?)?;
    println!(
        "{}: {} agent(s), {} task(s), {} objective(s), mode {}",
        team.name,
        team.agents.len(),
        team.tasks.len(),
        team.objectives.len(),
        team.config.mode
    );
    Ok(())
}

fn run_plan(file: &Path) -> Result<()> {
    let team = TeamDescriptor::load(file)?.build(&Config::load()?)?;
    let strategies = Strategies::from_config(&team.config, None)?;
    let orchestrator = Orchestrator::from_team(team, strategies)?;
    println!("{}", serde_json::to_string_pretty(&orchestrator.plan())?);
    Ok(())
}

fn run_team(file: &Path, tick_ms: u64, failures: Vec<(String, u32)>, json: bool) -> Result<()> {
    let config = Config::load()?;
    let descriptor = TeamDescriptor::load(file)?;

    let mut executor = ScriptedExecutor::new(Duration::from_millis(tick_ms));
    for (task, times) in failures {
        executor = executor.fail_times(task.as_str(), times);
    }

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let (tx, mut rx) = mpsc::channel::<OrchestrationEvent>(config.event_buffer);
        let conductor = Conductor::from_descriptor(&descriptor, &config, Arc::new(executor))?
            .with_events(tx);

        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => eprintln!("Unprintable event: {}", e),
                    }
                } else {
                    println!("{}", event);
                }
            }
        });

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let report = conductor.run(cancel).await?;
        let _ = printer.await;
        Ok::<RunReport, Error>(report)
    })?;

    if json {
        let summary = serde_json::json!({
            "run_id": report.run_id.to_string(),
            "team": report.team,
            "completed": report.completed,
            "blocked": report.blocked,
            "failed": report.failed,
            "unplanned": report.unplanned,
            "cycles": report.cycles.len(),
            "cancelled": report.cancelled,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_report(&report);
    }

    if report.cancelled {
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let elapsed = report.finished_at - report.started_at;
    println!();
    println!("Run {} ({})", report.run_id, report.team);
    println!("  Cycles:      {}", report.cycles.len());
    println!("  Completed:   {}", report.completed.len());
    println!("  Adaptations: {}", report.adaptations().count());
    println!("  Generated:   {}", report.generations().count());
    println!("  Duration:    {}ms", elapsed.num_milliseconds());
    for (task_id, reason) in &report.blocked {
        println!("  Blocked:     {} ({})", task_id, reason);
    }
    for task_id in &report.failed {
        println!("  Failed:      {}", task_id);
    }
    for task_id in &report.unplanned {
        println!("  Unplanned:   {}", task_id);
    }
}

fn run_config() -> Result<()> {
    let config = Config::load()?;
    println!("# {}", Config::config_path()?.display());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
