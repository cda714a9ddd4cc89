//! Periodic progress reporting
//!
//! A background thread wakes every interval, takes a bounded-wait snapshot
//! of the aggregator and logs it. A busy lock skips that tick rather than
//! stalling the workers.

use super::aggregator::RunAggregator;
use crate::constants::SNAPSHOT_WAIT_MS;
use crate::logging::RunLogger;
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Wake-up granularity of the reporter thread
const TICK: Duration = Duration::from_millis(100);

/// Background progress reporter
pub struct ProgressReporter {
    is_running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<usize>>,
}

impl ProgressReporter {
    /// Start reporting every `interval`; a zero interval disables reporting
    pub fn start(aggregator: Arc<RunAggregator>, logger: RunLogger, interval: Duration) -> Self {
        let is_running = Arc::new(AtomicBool::new(true));
        if interval.is_zero() {
            return Self {
                is_running,
                handle: None,
            };
        }

        let running = Arc::clone(&is_running);
        let handle = thread::spawn(move || {
            let mut reports = 0;
            let mut next = Instant::now() + interval;
            while running.load(Ordering::Relaxed) {
                thread::sleep(TICK);
                if Instant::now() < next {
                    continue;
                }
                next += interval;
                match aggregator.try_snapshot(Duration::from_millis(SNAPSHOT_WAIT_MS)) {
                    Some(snapshot) => {
                        logger.progress(&snapshot);
                        reports += 1;
                    }
                    None => debug!("Aggregator busy, skipping progress report"),
                }
            }
            reports
        });

        Self {
            is_running,
            handle: Some(handle),
        }
    }

    /// Stop the reporter; returns how many reports were logged
    pub fn stop(&mut self) -> usize {
        self.is_running.store(false, Ordering::Relaxed);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
