//! Thread-safe run aggregation
//!
//! Counters, per-worker status and the audit trail live behind one mutex.
//! Workers build a VM's whole outcome locally and commit it in a single
//! short critical section; nothing does I/O while the lock is held.

use crate::models::{OperationRecord, RunSummary};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Everything one VM contributed to the run
#[derive(Debug, Clone, Default)]
pub struct VmOutcome {
    /// Processed-marker key of the VM
    pub key: String,
    pub summary: RunSummary,
    pub records: Vec<OperationRecord>,
}

impl VmOutcome {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, record: OperationRecord) {
        self.records.push(record);
    }
}

/// What a worker thread is doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Processing { batch: usize, vm: String },
}

/// Point-in-time copy of run progress
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub summary: RunSummary,
    pub processed: usize,
    pub total: usize,
    pub batches_done: usize,
    pub total_batches: usize,
    pub active_workers: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct State {
    summary: RunSummary,
    records: Vec<OperationRecord>,
    workers: BTreeMap<usize, WorkerStatus>,
    processed: Vec<String>,
    batches_done: usize,
}

/// Shared sink for worker results
#[derive(Debug)]
pub struct RunAggregator {
    state: Mutex<State>,
    total_vms: usize,
    total_batches: usize,
    started: Instant,
}

impl RunAggregator {
    pub fn new(total_vms: usize, total_batches: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            total_vms,
            total_batches,
            started: Instant::now(),
        }
    }

    /// Merge one VM's outcome
    pub fn commit(&self, outcome: VmOutcome) {
        let mut state = self.state.lock();
        state.summary.absorb(&outcome.summary);
        state.records.extend(outcome.records);
        if !outcome.key.is_empty() {
            state.processed.push(outcome.key);
        }
    }

    /// Merge counters and records not tied to a batched VM
    pub fn add(&self, summary: &RunSummary, records: Vec<OperationRecord>) {
        let mut state = self.state.lock();
        state.summary.absorb(summary);
        state.records.extend(records);
    }

    pub fn set_worker_status(&self, worker: usize, status: WorkerStatus) {
        self.state.lock().workers.insert(worker, status);
    }

    pub fn batch_finished(&self, worker: usize) {
        let mut state = self.state.lock();
        state.batches_done += 1;
        state.workers.insert(worker, WorkerStatus::Idle);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock();
        self.snapshot_of(&state)
    }

    /// Snapshot with a bounded wait; `None` if the lock stayed busy
    pub fn try_snapshot(&self, timeout: Duration) -> Option<ProgressSnapshot> {
        let state = self.state.try_lock_for(timeout)?;
        Some(self.snapshot_of(&state))
    }

    /// Copy out the summary, audit trail and processed-marker keys
    pub fn results(&self) -> (RunSummary, Vec<OperationRecord>, Vec<String>) {
        let state = self.state.lock();
        (
            state.summary.clone(),
            state.records.clone(),
            state.processed.clone(),
        )
    }

    fn snapshot_of(&self, state: &State) -> ProgressSnapshot {
        ProgressSnapshot {
            summary: state.summary.clone(),
            processed: state.processed.len(),
            total: self.total_vms,
            batches_done: state.batches_done,
            total_batches: self.total_batches,
            active_workers: state
                .workers
                .values()
                .filter(|s| matches!(s, WorkerStatus::Processing { .. }))
                .count(),
            elapsed: self.started.elapsed(),
        }
    }
}
