//! Per-cycle result aggregate.
//! One `WorkerResult` is created when a cycle starts, threaded through every
//! stage and persisted once when the cycle ends.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state_machine::WorkerStage;

/// A flat key → phrase map for one language and context.
pub type Dictionary = BTreeMap<String, String>;

/// Which locale namespace a dictionary belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Frontend,
    Backend,
}

impl Context {
    pub const ALL: [Context; 2] = [Context::Frontend, Context::Backend];

    pub fn stage(self) -> WorkerStage {
        match self {
            Context::Frontend => WorkerStage::TranslatingFrontend,
            Context::Backend => WorkerStage::TranslatingBackend,
        }
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Context::Frontend => write!(f, "frontend"),
            Context::Backend => write!(f, "backend"),
        }
    }
}

/// A value kept separately for the frontend and the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerContext<T> {
    pub frontend: T,
    pub backend: T,
}

impl<T> PerContext<T> {
    pub fn get(&self, context: Context) -> &T {
        match context {
            Context::Frontend => &self.frontend,
            Context::Backend => &self.backend,
        }
    }

    pub fn get_mut(&mut self, context: Context) -> &mut T {
        match context {
            Context::Frontend => &mut self.frontend,
            Context::Backend => &mut self.backend,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Remove,
    Update,
}

/// One itemized phrase change planned for a language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseChange {
    pub language_code: String,
    pub key: String,
    pub kind: ChangeKind,
}

/// Work requested for one language, as computed by the diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub language_code: String,
    pub to_add: usize,
    pub to_remove: usize,
    pub to_update: usize,
    pub items: Vec<PhraseChange>,
}

impl TranslationRequest {
    /// Phrases that need a translation call.
    pub fn to_translate(&self) -> usize {
        self.to_add + self.to_update
    }

    pub fn total(&self) -> usize {
        self.to_add + self.to_remove + self.to_update
    }
}

/// Outcome of translating one language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub language_code: String,
    pub successful_count: usize,
    pub errors: Vec<String>,
}

/// Append-only record of one failed phrase translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationError {
    pub time: DateTime<Utc>,
    pub target_language: String,
    pub error_message: String,
    pub original_text: String,
}

impl TranslationError {
    pub fn new(
        target_language: impl Into<String>,
        error_message: impl Into<String>,
        original_text: impl Into<String>,
    ) -> Self {
        Self {
            time: Utc::now(),
            target_language: target_language.into(),
            error_message: error_message.into(),
            original_text: original_text.into(),
        }
    }
}

/// A stage-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerError {
    pub message: String,
    pub time: DateTime<Utc>,
    pub stage_at_failure: WorkerStage,
}

/// Snapshot of the "check servers and files" stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCheck {
    pub settings_loaded: bool,
    pub default_translation_found: PerContext<bool>,
    pub ignored_languages_found: bool,
    pub libre_languages_count: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Default for CycleCheck {
    fn default() -> Self {
        Self {
            settings_loaded: false,
            default_translation_found: PerContext::default(),
            ignored_languages_found: false,
            libre_languages_count: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }
}

/// Counters for the language display-name stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageTranslationStats {
    pub needed: usize,
    pub done: usize,
    pub errors: usize,
    pub failed: Vec<TranslationError>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Frontend or backend translation stage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translations {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub old_file_found: bool,
    pub translations_needed: usize,
    pub requests: Vec<TranslationRequest>,
    pub results: Vec<TranslationResult>,
    pub failed: Vec<TranslationError>,
    /// Outcome of this context's stage only.
    pub successful: bool,
}

impl Default for Translations {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            old_file_found: false,
            translations_needed: 0,
            requests: Vec::new(),
            results: Vec::new(),
            failed: Vec::new(),
            successful: true,
        }
    }
}

impl Translations {
    pub fn request_for(&self, language_code: &str) -> Option<&TranslationRequest> {
        self.requests.iter().find(|r| r.language_code == language_code)
    }

    pub fn result_for(&self, language_code: &str) -> Option<&TranslationResult> {
        self.results.iter().find(|r| r.language_code == language_code)
    }
}

/// What the storing stage managed to write and clean up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub snapshot_stored: PerContext<bool>,
    pub old_results_deleted: usize,
}

/// Aggregate root for one synchronization cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub id: uuid::Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub successful: bool,
    pub last_status: WorkerStage,
    pub cycle_check: CycleCheck,
    pub language_translations: LanguageTranslationStats,
    pub translations: PerContext<Translations>,
    pub cleanup: CleanupResult,
    pub errors: Vec<WorkerError>,
}

impl WorkerResult {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            start_time: Utc::now(),
            end_time: None,
            successful: true,
            last_status: WorkerStage::Idle,
            cycle_check: CycleCheck::default(),
            language_translations: LanguageTranslationStats::default(),
            translations: PerContext::default(),
            cleanup: CleanupResult::default(),
            errors: Vec::new(),
        }
    }

    /// Record progress to `stage`. Backward moves within a cycle are ignored.
    pub fn advance_to(&mut self, stage: WorkerStage) -> bool {
        if stage.ordinal() < self.last_status.ordinal() {
            warn!(from = %self.last_status, to = %stage, "ignoring backward status change");
            return false;
        }
        self.last_status = stage;
        true
    }

    /// Append a stage failure and mark the cycle unsuccessful.
    pub fn fail(&mut self, stage: WorkerStage, message: impl Into<String>) {
        self.successful = false;
        self.errors.push(WorkerError {
            message: message.into(),
            time: Utc::now(),
            stage_at_failure: stage,
        });
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }
}

impl Default for WorkerResult {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        let mut result = WorkerResult::new();
        assert!(result.advance_to(WorkerStage::CheckServersAndFiles));
        assert!(result.advance_to(WorkerStage::TranslatingBackend));
        assert!(!result.advance_to(WorkerStage::TranslatingFrontend));
        assert_eq!(result.last_status, WorkerStage::TranslatingBackend);
    }

    #[test]
    fn fail_records_stage_and_flips_flag() {
        let mut result = WorkerResult::new();
        result.fail(WorkerStage::TranslatingFrontend, "disk full");
        assert!(!result.successful);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].stage_at_failure, WorkerStage::TranslatingFrontend);
    }

    #[test]
    fn serializes_as_structured_record() {
        let mut result = WorkerResult::new();
        result.translations.backend.requests.push(TranslationRequest {
            language_code: "de".into(),
            to_add: 1,
            ..Default::default()
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["translations"]["backend"]["requests"][0]["language_code"], "de");
        assert_eq!(json["last_status"], "Idle");
    }
}
