//! A blocking loop that keeps subscriptions up to date.

use crate::engine::{ProcessedResult, SubscriptionEngine, SubscriptionEngineCriteria};
use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for a [`Worker`].
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Subscriptions this worker drives.
    pub criteria: SubscriptionEngineCriteria,

    /// Max messages per `boot` and per `run` call (None = unbounded).
    pub run_limit: Option<usize>,

    /// How long to wait for new messages when idle.
    /// Default: 1s
    pub idle_wait: Duration,

    /// Stop after this many run iterations (None = until stopped).
    pub max_iterations: Option<u64>,

    /// Boot new and booting subscriptions before every run.
    /// Default: true
    pub boot: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            criteria: SubscriptionEngineCriteria::default(),
            run_limit: None,
            idle_wait: Duration::from_secs(1),
            max_iterations: None,
            boot: true,
        }
    }
}

/// Asks a running worker to stop after its current iteration.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Totals over a worker's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Completed boot and run cycles.
    pub iterations: u64,
    /// Messages read across boot and run.
    pub processed_messages: usize,
    /// Subscription failures reported across boot and run.
    pub failures: usize,
}

impl WorkerStats {
    fn record(&mut self, result: &ProcessedResult) {
        self.processed_messages += result.processed_messages;
        self.failures += result.errors.len();
    }
}

/// Calls `boot` and `run` in a loop, waiting on the store when there is
/// nothing to do.
pub struct Worker {
    engine: Arc<SubscriptionEngine>,
    config: WorkerConfig,
    stop: StopHandle,
}

impl Worker {
    pub fn new(engine: Arc<SubscriptionEngine>, config: WorkerConfig) -> Self {
        Self {
            engine,
            config,
            stop: StopHandle::default(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run until stopped or `max_iterations` is reached. Store and
    /// subscription store errors end the loop.
    pub fn run(&self) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();

        while !self.should_stop(&stats) {
            let mut idle = true;

            // Picks up subscribers added since the last cycle and the ones
            // a retry put back into New or Booting.
            if self.config.boot {
                let booted = self.engine.boot(&self.config.criteria, self.config.run_limit)?;
                stats.record(&booted);
                if booted.processed_messages > 0 || !booted.errors.is_empty() {
                    info!(
                        processed = booted.processed_messages,
                        failures = booted.errors.len(),
                        "worker booted subscriptions"
                    );
                }
                idle &= booted.finished && booted.processed_messages == 0;
            }

            let result = self.engine.run(&self.config.criteria, self.config.run_limit)?;
            stats.iterations += 1;
            stats.record(&result);

            idle &= result.finished && result.processed_messages == 0;
            if idle && !self.should_stop(&stats) {
                debug!(wait = ?self.config.idle_wait, "worker idle");
                self.engine.store().wait(self.config.idle_wait)?;
            }
        }

        info!(
            iterations = stats.iterations,
            processed = stats.processed_messages,
            failures = stats.failures,
            "worker stopped"
        );
        Ok(stats)
    }

    fn should_stop(&self, stats: &WorkerStats) -> bool {
        self.stop.is_stopped()
            || self
                .config
                .max_iterations
                .is_some_and(|max| stats.iterations >= max)
    }
}
