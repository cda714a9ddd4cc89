//! Logging setup and structured run events
//!
//! `init` installs `env_logger` behind the `log` facade. `RunLogger` emits
//! one-line JSON events for run milestones so a transcript can be parsed
//! after the fact.

use crate::executor::aggregator::ProgressSnapshot;
use crate::models::{RunStatus, RunSummary};
use anyhow::{Context, Result};
use log::{error, info};
use serde_json::json;
use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

/// Verbosity selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Install the global logger; `RUST_LOG` wins over `verbosity`
///
/// With `log_file` set, records are appended to that file instead of
/// stderr.
pub fn init(verbosity: Verbosity, log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(verbosity.default_filter()),
    );
    builder.format_timestamp_millis();

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))
}

/// Log levels for run events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Info,
}

/// Structured logger for one reconciliation run
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
    environment: String,
    level: LogLevel,
}

impl RunLogger {
    pub fn new(run_id: impl Into<String>, environment: impl Into<String>, level: LogLevel) -> Self {
        Self {
            run_id: run_id.into(),
            environment: environment.into(),
            level,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Log run startup
    pub fn run_started(&self, source: &str, vm_count: usize, threads: usize, batches: usize, strategy: &str) {
        let message = json!({
            "event": "run_started",
            "run_id": self.run_id,
            "environment": self.environment,
            "source": source,
            "vm_count": vm_count,
            "threads": threads,
            "batches": batches,
            "strategy": strategy,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(
            LogLevel::Info,
            &format!("Reconciling {} VMs on {}", vm_count, source),
            &message,
        );
    }

    /// Log completion of one batch
    pub fn batch_finished(&self, batch_id: usize, worker: usize, vms: usize, elapsed: Duration) {
        let message = json!({
            "event": "batch_finished",
            "run_id": self.run_id,
            "batch_id": batch_id,
            "worker": worker,
            "vm_count": vms,
            "duration_ms": elapsed.as_millis() as u64,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Info, &format!("Batch {} finished", batch_id), &message);
    }

    /// Log a periodic progress snapshot
    pub fn progress(&self, snapshot: &ProgressSnapshot) {
        let message = json!({
            "event": "progress",
            "run_id": self.run_id,
            "processed": snapshot.processed,
            "total": snapshot.total,
            "batches_done": snapshot.batches_done,
            "total_batches": snapshot.total_batches,
            "active_workers": snapshot.active_workers,
            "permissions_assigned": snapshot.summary.permissions_assigned,
            "errors": snapshot.summary.errors_encountered,
            "elapsed_ms": snapshot.elapsed.as_millis() as u64,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(
            LogLevel::Info,
            &format!("Progress {}/{} VMs", snapshot.processed, snapshot.total),
            &message,
        );
    }

    /// Log run completion
    pub fn run_finished(&self, status: RunStatus, summary: &RunSummary, elapsed: Duration, interrupted: bool) {
        let message = json!({
            "event": "run_finished",
            "run_id": self.run_id,
            "environment": self.environment,
            "status": status,
            "summary": summary,
            "duration_ms": elapsed.as_millis() as u64,
            "interrupted": interrupted,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        let level = if status == RunStatus::Failed {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        self.log_structured(level, &format!("Run finished: {}", status), &message);
    }

    /// Log an error outside per-operation records
    pub fn run_error(&self, error_message: &str, context: Option<&str>) {
        let message = json!({
            "event": "error",
            "run_id": self.run_id,
            "message": error_message,
            "context": context,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.log_structured(LogLevel::Error, error_message, &message);
    }

    fn log_structured(&self, level: LogLevel, message: &str, data: &serde_json::Value) {
        if !self.should_log(level) {
            return;
        }
        let full_message = format!("{} | {}", message, data);
        match level {
            LogLevel::Error => error!("{}", full_message),
            LogLevel::Info => info!("{}", full_message),
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        matches!(
            (self.level, level),
            (LogLevel::Error, LogLevel::Error) | (LogLevel::Info, _)
        )
    }
}
