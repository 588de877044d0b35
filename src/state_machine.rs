//! Cycle state machine: Idle → CheckServersAndFiles → CheckLanguagesTranslations →
//! TranslatingFrontend → TranslatingBackend → StoringChanges → Idle.
//! Any stage may short-circuit forward to StoringChanges or drop to Idle.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::notify::ProgressNotifier;

/// All stages a synchronization cycle passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkerStage {
    Idle,
    CheckServersAndFiles,
    CheckLanguagesTranslations,
    TranslatingFrontend,
    TranslatingBackend,
    StoringChanges,
}

impl std::fmt::Display for WorkerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStage::Idle => write!(f, "Idle"),
            WorkerStage::CheckServersAndFiles => write!(f, "CheckServersAndFiles"),
            WorkerStage::CheckLanguagesTranslations => write!(f, "CheckLanguagesTranslations"),
            WorkerStage::TranslatingFrontend => write!(f, "TranslatingFrontend"),
            WorkerStage::TranslatingBackend => write!(f, "TranslatingBackend"),
            WorkerStage::StoringChanges => write!(f, "StoringChanges"),
        }
    }
}

impl WorkerStage {
    /// Human readable status pushed to progress subscribers.
    pub fn status_text(self) -> &'static str {
        match self {
            WorkerStage::Idle => "Idle",
            WorkerStage::CheckServersAndFiles => "Checking servers and files",
            WorkerStage::CheckLanguagesTranslations => "Translating language names",
            WorkerStage::TranslatingFrontend => "Translating frontend",
            WorkerStage::TranslatingBackend => "Translating backend",
            WorkerStage::StoringChanges => "Storing changes",
        }
    }

    /// Position in the cycle; Idle is both first and last.
    pub fn ordinal(self) -> u8 {
        match self {
            WorkerStage::Idle => 0,
            WorkerStage::CheckServersAndFiles => 1,
            WorkerStage::CheckLanguagesTranslations => 2,
            WorkerStage::TranslatingFrontend => 3,
            WorkerStage::TranslatingBackend => 4,
            WorkerStage::StoringChanges => 5,
        }
    }

    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: WorkerStage) -> bool {
        matches!(
            (self, next),
            (WorkerStage::Idle, WorkerStage::CheckServersAndFiles)
                | (WorkerStage::CheckServersAndFiles, WorkerStage::CheckLanguagesTranslations)
                | (WorkerStage::CheckLanguagesTranslations, WorkerStage::TranslatingFrontend)
                | (WorkerStage::TranslatingFrontend, WorkerStage::TranslatingBackend)
                | (WorkerStage::TranslatingBackend, WorkerStage::StoringChanges)
                // precondition failure short-circuits to storing
                | (WorkerStage::CheckServersAndFiles, WorkerStage::StoringChanges)
                | (WorkerStage::CheckLanguagesTranslations, WorkerStage::StoringChanges)
                | (WorkerStage::TranslatingFrontend, WorkerStage::StoringChanges)
                // any stage can abort to Idle
                | (_, WorkerStage::Idle)
        )
    }
}

/// Tracks the stage of the in-flight cycle and publishes it to subscribers.
pub struct StageTracker {
    stage: RwLock<WorkerStage>,
    stage_tx: watch::Sender<WorkerStage>,
    notifier: Arc<dyn ProgressNotifier>,
}

impl StageTracker {
    pub fn new(notifier: Arc<dyn ProgressNotifier>) -> Self {
        let (stage_tx, _) = watch::channel(WorkerStage::Idle);
        Self {
            stage: RwLock::new(WorkerStage::Idle),
            stage_tx,
            notifier,
        }
    }

    /// Current stage (non-blocking read).
    pub fn current(&self) -> WorkerStage {
        *self.stage.read()
    }

    /// Attempt a transition. Notifies subscribers on success.
    pub async fn transition(&self, next: WorkerStage) -> Result<WorkerStage, String> {
        let current = {
            let mut stage = self.stage.write();
            let current = *stage;
            if !current.can_transition_to(next) {
                let msg = format!("invalid transition: {} -> {}", current, next);
                warn!("{}", msg);
                return Err(msg);
            }
            *stage = next;
            current
        };
        self.stage_tx.send_replace(next);
        info!(from = %current, to = %next, "stage_transition");
        self.notifier.on_status_changed(next).await;
        Ok(next)
    }

    /// Force back to Idle from any stage.
    pub async fn force_idle(&self) {
        let prev = {
            let mut stage = self.stage.write();
            std::mem::replace(&mut *stage, WorkerStage::Idle)
        };
        self.stage_tx.send_replace(WorkerStage::Idle);
        if prev != WorkerStage::Idle {
            info!(from = %prev, "force_idle");
            self.notifier.on_status_changed(WorkerStage::Idle).await;
        }
    }

    /// Subscribe to stage changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkerStage> {
        self.stage_tx.subscribe()
    }
}
