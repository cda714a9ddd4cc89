//! Parallel execution module
//!
//! Runs planned batches on a bounded rayon pool. Each batch is one task:
//! its VMs are processed sequentially by a single worker, and each VM's
//! outcome is committed to the shared `RunAggregator`.
//!
//! The run deadline or an external signal sets the shared cancel flag.
//! Workers stop picking up VMs once it is set; the coordinator then waits a
//! grace period for in-flight work before abandoning it.

use crate::logging::RunLogger;
use crate::models::InventoryObject;
use crate::planner::Batch;
use aggregator::{RunAggregator, VmOutcome, WorkerStatus};
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use progress::ProgressReporter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub mod aggregator;
pub mod progress;
pub mod retry;

/// How often the coordinator checks the cancel flag while waiting
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Worker pool and deadline settings
#[derive(Debug, Clone, Copy)]
pub struct ExecutionSettings {
    pub threads: usize,
    /// End of the whole run's time budget, not just this phase
    pub deadline: Instant,
    pub grace: Duration,
    pub report_interval: Duration,
}

/// How a parallel run ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// The run deadline passed
    pub timed_out: bool,
    /// The cancel flag was set from outside (signal)
    pub interrupted: bool,
    /// Workers were still busy when the grace period ran out
    pub abandoned: bool,
    pub progress_reports: usize,
}

impl ExecutionReport {
    pub fn cut_short(&self) -> bool {
        self.timed_out || self.interrupted
    }

    /// No worker can still be mutating the inventory
    pub fn settled(&self) -> bool {
        !self.abandoned
    }
}

/// Dispatches batches to the worker pool and enforces the deadline
pub struct Coordinator {
    settings: ExecutionSettings,
    cancel: Arc<AtomicBool>,
    logger: RunLogger,
}

impl Coordinator {
    pub fn new(settings: ExecutionSettings, cancel: Arc<AtomicBool>, logger: RunLogger) -> Self {
        Self {
            settings,
            cancel,
            logger,
        }
    }

    /// Run `process` over every VM of every batch
    ///
    /// Returns once all batches finished, or once the grace period after
    /// cancellation ran out. Results committed so far stay in `aggregator`.
    pub fn run<F>(
        &self,
        batches: Vec<Batch>,
        aggregator: Arc<RunAggregator>,
        process: F,
    ) -> Result<ExecutionReport>
    where
        F: Fn(&InventoryObject) -> VmOutcome + Send + Sync + 'static,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.threads)
            .thread_name(|index| format!("tagperm-worker-{}", index))
            .build()
            .context("Failed to build worker pool")?;

        let mut reporter = ProgressReporter::start(
            Arc::clone(&aggregator),
            self.logger.clone(),
            self.settings.report_interval,
        );

        let (done_tx, done_rx) = mpsc::channel();
        let process = Arc::new(process);
        let cancel = Arc::clone(&self.cancel);
        let logger = self.logger.clone();
        let dispatcher = thread::spawn(move || {
            pool.scope(|scope| {
                for batch in batches {
                    let process = Arc::clone(&process);
                    let aggregator = Arc::clone(&aggregator);
                    let cancel = Arc::clone(&cancel);
                    let logger = logger.clone();
                    scope.spawn(move |_| run_batch(&batch, &aggregator, &cancel, &logger, &*process));
                }
            });
            // Receiver is gone only if the coordinator abandoned us
            let _ = done_tx.send(());
        });

        let mut report = ExecutionReport::default();
        let deadline = self.settings.deadline;
        let finished = loop {
            // Deadline first: an earlier phase that ran out of time has
            // already set the cancel flag
            let now = Instant::now();
            if now >= deadline {
                report.timed_out = true;
                self.cancel.store(true, Ordering::Relaxed);
                warn!("Run time limit reached, stopping after in-flight VMs");
                break false;
            }
            if self.cancel.load(Ordering::Relaxed) {
                report.interrupted = true;
                warn!("Cancellation requested, stopping after in-flight VMs");
                break false;
            }
            match done_rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(()) => break true,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break true,
            }
        };

        if !finished {
            match done_rx.recv_timeout(self.settings.grace) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("Workers drained within the grace period")
                }
                Err(RecvTimeoutError::Timeout) => {
                    report.abandoned = true;
                    warn!(
                        "Workers still busy after {}s grace period; reporting partial results",
                        self.settings.grace.as_secs()
                    );
                }
            }
        }

        report.progress_reports = reporter.stop();
        if !report.abandoned && dispatcher.join().is_err() {
            bail!("A worker thread panicked");
        }
        Ok(report)
    }
}

fn run_batch(
    batch: &Batch,
    aggregator: &RunAggregator,
    cancel: &AtomicBool,
    logger: &RunLogger,
    process: &dyn Fn(&InventoryObject) -> VmOutcome,
) {
    let worker = rayon::current_thread_index().unwrap_or(0);
    let started = Instant::now();
    let mut done = 0;

    for vm in &batch.vms {
        if cancel.load(Ordering::Relaxed) {
            info!(
                "Batch {}: cancelled with {} of {} VMs done",
                batch.id,
                done,
                batch.len()
            );
            break;
        }
        aggregator.set_worker_status(
            worker,
            WorkerStatus::Processing {
                batch: batch.id,
                vm: vm.name.clone(),
            },
        );
        aggregator.commit(process(vm));
        done += 1;
    }

    aggregator.batch_finished(worker);
    logger.batch_finished(batch.id, worker, done, started.elapsed());
}
