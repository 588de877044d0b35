//! Progress notification sink.
//! Best-effort delivery: a missing or lagging subscriber never fails a cycle.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::state_machine::WorkerStage;

/// Consumer of cycle progress (a SignalR-style hub, a log, a test recorder).
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    async fn on_cycle_started(&self);

    async fn on_status_changed(&self, stage: WorkerStage);

    async fn on_stage_completed(&self, stage: WorkerStage, results: serde_json::Value);
}

/// Event published by [`ProgressHub`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    CycleStarted,
    StatusChanged {
        stage: WorkerStage,
        text: &'static str,
    },
    StageCompleted {
        stage: WorkerStage,
        results: serde_json::Value,
    },
}

/// Fan-out of progress events to any number of transport subscribers.
pub struct ProgressHub {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: ProgressEvent) {
        // Err only means nobody is listening right now
        if self.tx.send(event).is_err() {
            debug!("progress event dropped, no subscribers");
        }
    }
}

#[async_trait]
impl ProgressNotifier for ProgressHub {
    async fn on_cycle_started(&self) {
        self.publish(ProgressEvent::CycleStarted);
    }

    async fn on_status_changed(&self, stage: WorkerStage) {
        self.publish(ProgressEvent::StatusChanged {
            stage,
            text: stage.status_text(),
        });
    }

    async fn on_stage_completed(&self, stage: WorkerStage, results: serde_json::Value) {
        self.publish(ProgressEvent::StageCompleted { stage, results });
    }
}

/// Notifier that only writes to the log.
pub struct LogNotifier;

#[async_trait]
impl ProgressNotifier for LogNotifier {
    async fn on_cycle_started(&self) {
        info!("cycle_started");
    }

    async fn on_status_changed(&self, stage: WorkerStage) {
        info!(stage = %stage, text = stage.status_text(), "status_changed");
    }

    async fn on_stage_completed(&self, stage: WorkerStage, _results: serde_json::Value) {
        info!(stage = %stage, "stage_completed");
    }
}

/// Forwards every callback to each inner notifier, in order.
pub struct FanOut(pub Vec<Arc<dyn ProgressNotifier>>);

#[async_trait]
impl ProgressNotifier for FanOut {
    async fn on_cycle_started(&self) {
        for notifier in &self.0 {
            notifier.on_cycle_started().await;
        }
    }

    async fn on_status_changed(&self, stage: WorkerStage) {
        for notifier in &self.0 {
            notifier.on_status_changed(stage).await;
        }
    }

    async fn on_stage_completed(&self, stage: WorkerStage, results: serde_json::Value) {
        for notifier in &self.0 {
            notifier.on_stage_completed(stage, results.clone()).await;
        }
    }
}
