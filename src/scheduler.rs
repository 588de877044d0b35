//! Periodic cycle scheduler.
//! At most one cycle runs at a time: a tick that arrives while a cycle is in
//! flight is dropped, never queued. Every cycle gets a fresh scope from the
//! factory, and the running flag is reset on success, failure and panic.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::{metric_names, MetricsRegistry};
use crate::worker_result::WorkerResult;

/// A runnable cycle scope.
#[async_trait]
pub trait Cycle: Send + Sync {
    async fn run(&self) -> WorkerResult;
}

/// Builds the scope of one cycle (store and client handles, runner).
pub trait CycleFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Cycle>, SchedulerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("cycle scope could not be built: {0}")]
    Scope(String),
}

#[derive(Debug)]
pub enum TickOutcome {
    Completed(Box<WorkerResult>),
    /// Another cycle was still running.
    Dropped,
    /// The scope could not be built or the cycle panicked.
    Failed(String),
}

/// Clears the running flag when the tick ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    running: AtomicBool,
    factory: Arc<dyn CycleFactory>,
    metrics: Arc<MetricsRegistry>,
}

impl Scheduler {
    pub fn new(factory: Arc<dyn CycleFactory>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            running: AtomicBool::new(false),
            factory,
            metrics,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one cycle unless one is already in flight.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("cycle still running, tick dropped");
            self.metrics.increment(metric_names::TICKS_DROPPED, 1);
            return TickOutcome::Dropped;
        }
        let _guard = RunningGuard(&self.running);

        let cycle = match self.factory.create() {
            Ok(cycle) => cycle,
            Err(e) => {
                error!(error = %e, "cycle not started");
                return TickOutcome::Failed(e.to_string());
            }
        };

        match AssertUnwindSafe(cycle.run()).catch_unwind().await {
            Ok(result) => TickOutcome::Completed(Box::new(result)),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "cycle panicked");
                TickOutcome::Failed(message)
            }
        }
    }

    /// Tick immediately, then every `interval`, until `shutdown` is cancelled.
    /// Waits for the in-flight cycle before returning.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Vec<JoinHandle<TickOutcome>> = Vec::new();

        info!(interval_secs = interval.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            in_flight.retain(|handle| !handle.is_finished());

            let this = Arc::clone(&self);
            in_flight.push(tokio::spawn(async move {
                let outcome = this.tick().await;
                if let TickOutcome::Completed(result) = &outcome {
                    info!(
                        id = %result.id,
                        successful = result.successful,
                        "scheduled cycle done"
                    );
                }
                outcome
            }));
        }

        info!(pending = in_flight.len(), "scheduler stopping, waiting for cycle");
        for handle in in_flight {
            if let Err(e) = handle.await {
                error!(error = %e, "cycle task failed");
            }
        }
        info!("scheduler stopped");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
