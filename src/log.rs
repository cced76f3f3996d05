//! File logging for conductor runs.
//!
//! Levels as used across the crate:
//! - ERROR: a run could not proceed (rejected cycle, configuration, I/O)
//! - WARN: per-task trouble (failed attempts, unassignable or blocked tasks, dropped adaptations)
//! - INFO: run lifecycle and committed planning cycles
//! - DEBUG: strategy decisions, state transitions and emitted events
//! - TRACE: worker start and stop
//!
//! `--debug` or `CONDUCTOR_DEBUG=1` lowers the threshold to DEBUG.
//! `CONDUCTOR_LOG=<level>` sets it explicitly and wins over both.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_FILE: OnceLock<PathBuf> = OnceLock::new();
static THRESHOLD: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// File name of the run log inside `~/.conductor`.
pub const LOG_FILE_NAME: &str = "conductor.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl From<u8> for LogLevel {
    fn from(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Pick the threshold from the debug flag and the environment.
fn resolve_level(debug: bool) -> LogLevel {
    if let Some(level) = std::env::var("CONDUCTOR_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        return level;
    }
    let env_debug = std::env::var("CONDUCTOR_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if debug || env_debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

/// Start logging to `~/.conductor/conductor.log`, truncating the previous run's log.
///
/// Without a home directory logging stays off.
pub fn init_with_debug(debug: bool) {
    let level = resolve_level(debug);
    if let Some(dir) = dirs::home_dir().map(|h| h.join(".conductor")) {
        if std::fs::create_dir_all(&dir).is_ok() {
            init_at(&dir.join(LOG_FILE_NAME), level);
            return;
        }
    }
    set_level(level);
}

/// Start logging to `path` at `level`. Only the first call picks the file.
pub fn init_at(path: &Path, level: LogLevel) {
    set_level(level);
    if LOG_FILE.get().is_none() {
        let _ = std::fs::write(path, "");
        let _ = LOG_FILE.set(path.to_path_buf());
    }
}

pub fn set_level(level: LogLevel) {
    THRESHOLD.store(level as u8, Ordering::SeqCst);
}

pub fn level() -> LogLevel {
    LogLevel::from(THRESHOLD.load(Ordering::Relaxed))
}

/// Append one line at `level`. Dropped before init or when below the threshold.
pub fn write(level: LogLevel, msg: &str) {
    if level > self::level() {
        return;
    }
    let Some(path) = LOG_FILE.get() else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(file, "{} {:<5} {}", timestamp, level.label(), msg);
    }
}

#[macro_export]
macro_rules! clog {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_error {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_warn {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Only written with `--debug`, `CONDUCTOR_DEBUG=1` or a `CONDUCTOR_LOG` of debug or trace.
#[macro_export]
macro_rules! clog_debug {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_trace {
    ($($arg:tt)*) => {
        $crate::log::write($crate::log::LogLevel::Trace, &format!($($arg)*))
    };
}
