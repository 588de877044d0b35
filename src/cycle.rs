//! One synchronization cycle.
//!
//! Stages run in order on a fresh `WorkerResult`:
//! check servers and files → language names → frontend → backend → storing.
//! A failed precondition in the first stage jumps straight to storing; a
//! failure inside a translation stage only affects that context.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{is_language_code, Settings};
use crate::diff::{diff, plan_language};
use crate::history::ResultSink;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::notify::ProgressNotifier;
use crate::queue::QueueProcessor;
use crate::scheduler::{Cycle, CycleFactory, SchedulerError};
use crate::state_machine::{StageTracker, WorkerStage};
use crate::store::{DictionaryStore, FileDictionaryStore, LanguageNames, PendingPhrases};
use crate::translate::cache::TranslationCache;
use crate::translate::{ApiLanguage, LibreTranslateClient, Translator};
use crate::worker_result::{
    Context, Dictionary, PerContext, TranslationError, Translations, WorkerResult,
};

/// Everything a cycle needs. Built fresh per cycle by the scheduler's factory.
#[derive(Clone)]
pub struct CycleDeps {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn DictionaryStore>,
    pub translator: Arc<dyn Translator>,
    pub sink: Arc<dyn ResultSink>,
    pub notifier: Arc<dyn ProgressNotifier>,
    pub tracker: Arc<StageTracker>,
    pub cache: Arc<TranslationCache>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Production factory: a file store and an HTTP client per cycle, sharing
/// the long-lived tracker, cache, history and metrics.
pub struct EngineCycleFactory {
    pub settings: Arc<Settings>,
    pub sink: Arc<dyn ResultSink>,
    pub notifier: Arc<dyn ProgressNotifier>,
    pub tracker: Arc<StageTracker>,
    pub cache: Arc<TranslationCache>,
    pub metrics: Arc<MetricsRegistry>,
}

impl CycleFactory for EngineCycleFactory {
    fn create(&self) -> Result<Box<dyn Cycle>, SchedulerError> {
        let client = LibreTranslateClient::from_config(self.settings.translator.clone())
            .map_err(|e| SchedulerError::Scope(e.to_string()))?;
        Ok(Box::new(CycleRunner::new(CycleDeps {
            settings: Arc::clone(&self.settings),
            store: Arc::new(FileDictionaryStore::new(&self.settings.storage)),
            translator: Arc::new(client),
            sink: Arc::clone(&self.sink),
            notifier: Arc::clone(&self.notifier),
            tracker: Arc::clone(&self.tracker),
            cache: Arc::clone(&self.cache),
            metrics: Arc::clone(&self.metrics),
        })))
    }
}

/// Facts gathered by the first stage and shared by the others.
struct CycleInputs {
    api_languages: Vec<ApiLanguage>,
    supported: Vec<String>,
    defaults: PerContext<Option<Dictionary>>,
    /// Target languages for both contexts, sorted, default language excluded.
    required_languages: Vec<String>,
}

pub struct CycleRunner {
    deps: CycleDeps,
    queue: QueueProcessor,
}

impl CycleRunner {
    pub fn new(deps: CycleDeps) -> Self {
        let queue = QueueProcessor::new(
            Arc::clone(&deps.translator),
            Arc::clone(&deps.cache),
            Arc::clone(&deps.metrics),
            &deps.settings.queue,
        );
        Self { deps, queue }
    }

    /// Run every stage and return the persisted aggregate.
    pub async fn run(&self) -> WorkerResult {
        let ids = self.deps.metrics.next_cycle();
        let span = info_span!("cycle", trace_id = %ids.trace_id, generation = ids.generation);
        self.run_stages().instrument(span).await
    }

    async fn run_stages(&self) -> WorkerResult {
        let timer = self.deps.metrics.span(metric_names::CYCLE);
        let mut result = WorkerResult::new();
        info!(id = %result.id, "cycle started");

        if self.deps.tracker.current() != WorkerStage::Idle {
            warn!(stage = %self.deps.tracker.current(), "stale stage from previous cycle");
            self.deps.tracker.force_idle().await;
        }
        self.deps.notifier.on_cycle_started().await;

        match self.check_servers_and_files(&mut result).await {
            Some(inputs) => {
                self.translate_language_names(&mut result, &inputs).await;
                for context in Context::ALL {
                    self.translate_context(context, &mut result, &inputs).await;
                }
                self.store_changes(&mut result, Some(&inputs)).await;
            }
            None => {
                warn!("precondition failed, skipping to storing changes");
                self.store_changes(&mut result, None).await;
            }
        }

        let elapsed = timer.finish();
        info!(
            id = %result.id,
            successful = result.successful,
            errors = result.errors.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "cycle finished"
        );
        result
    }

    async fn enter(&self, result: &mut WorkerResult, stage: WorkerStage) {
        if let Err(e) = self.deps.tracker.transition(stage).await {
            warn!(error = %e, "stage tracker out of sync");
        }
        result.advance_to(stage);
    }

    async fn complete<T: Serialize>(&self, stage: WorkerStage, slice: &T) {
        let value = serde_json::to_value(slice).unwrap_or(serde_json::Value::Null);
        self.deps.notifier.on_stage_completed(stage, value).await;
    }

    /// Stage 1. Returns `None` when the cycle must short-circuit.
    async fn check_servers_and_files(&self, result: &mut WorkerResult) -> Option<CycleInputs> {
        let stage = WorkerStage::CheckServersAndFiles;
        self.enter(result, stage).await;
        let timer = self.deps.metrics.span(metric_names::STAGE_CHECK);
        result.cycle_check.start_time = Utc::now();

        let inputs = self.gather_inputs(result).await;

        result.cycle_check.end_time = Some(Utc::now());
        timer.finish();
        self.complete(stage, &result.cycle_check).await;
        inputs
    }

    async fn gather_inputs(&self, result: &mut WorkerResult) -> Option<CycleInputs> {
        let stage = WorkerStage::CheckServersAndFiles;
        let settings = &self.deps.settings;

        if let Err(e) = settings.validate() {
            result.fail(stage, format!("settings invalid: {}", e));
            return None;
        }
        result.cycle_check.settings_loaded = true;

        let api_languages = match self.deps.translator.available_languages().await {
            Ok(languages) if !languages.is_empty() => languages,
            Ok(_) => {
                result.fail(stage, "translation server returned no languages");
                return None;
            }
            Err(e) => {
                result.fail(stage, format!("translation server unavailable: {}", e));
                return None;
            }
        };
        result.cycle_check.libre_languages_count = api_languages.len();
        let supported: Vec<String> = api_languages.iter().map(|l| l.code.clone()).collect();

        let default_language = settings.localization.default_language.as_str();
        let mut defaults = PerContext::<Option<Dictionary>>::default();
        let mut present = BTreeSet::new();

        for context in Context::ALL {
            match self.deps.store.load(default_language, context).await {
                Ok(Some(dictionary)) => {
                    *result.cycle_check.default_translation_found.get_mut(context) = true;
                    *defaults.get_mut(context) = Some(dictionary);
                }
                Ok(None) => result.fail(
                    stage,
                    format!("default {} dictionary ({}) not found", context, default_language),
                ),
                Err(e) => result.fail(
                    stage,
                    format!("default {} dictionary unreadable: {}", context, e),
                ),
            }

            match self.deps.store.list_present_languages(context).await {
                Ok(codes) => present.extend(codes),
                Err(e) => result.fail(stage, format!("listing {} languages failed: {}", context, e)),
            }
        }

        let localization = &settings.localization;
        result.cycle_check.ignored_languages_found =
            present.iter().any(|code| localization.is_ignored(code));

        let required_languages: Vec<String> = present
            .into_iter()
            .chain(localization.extra_languages.iter().map(|c| c.to_ascii_lowercase()))
            .filter(|code| is_language_code(code))
            .filter(|code| !localization.is_ignored(code))
            .filter(|code| !code.eq_ignore_ascii_case(default_language))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        info!(
            api_languages = api_languages.len(),
            required = ?required_languages,
            "servers and files checked"
        );

        Some(CycleInputs {
            api_languages,
            supported,
            defaults,
            required_languages,
        })
    }

    /// Stage 2: localized display names of every required language.
    async fn translate_language_names(&self, result: &mut WorkerResult, inputs: &CycleInputs) {
        let stage = WorkerStage::CheckLanguagesTranslations;
        self.enter(result, stage).await;
        let timer = self.deps.metrics.span(metric_names::STAGE_LANGUAGE_NAMES);
        result.language_translations.start_time = Some(Utc::now());

        match self.deps.store.load_language_names().await {
            Ok(mut table) => {
                let saved = self.fill_language_names(&mut table, result, inputs).await;
                if saved {
                    if let Err(e) = self.deps.store.save_language_names(&table).await {
                        result.fail(stage, format!("saving language names failed: {}", e));
                    }
                }
            }
            Err(e) => result.fail(stage, format!("loading language names failed: {}", e)),
        }

        result.language_translations.end_time = Some(Utc::now());
        timer.finish();
        self.complete(stage, &result.language_translations).await;
    }

    /// Returns whether the table changed.
    async fn fill_language_names(
        &self,
        table: &mut LanguageNames,
        result: &mut WorkerResult,
        inputs: &CycleInputs,
    ) -> bool {
        let source = "en";
        let default_language = self.deps.settings.localization.default_language.as_str();
        let mut languages: BTreeSet<&str> =
            inputs.required_languages.iter().map(String::as_str).collect();
        languages.insert(default_language);

        let stats = &mut result.language_translations;
        let mut changed = false;

        for &target in &languages {
            if !inputs.supported.iter().any(|c| c == target) {
                continue;
            }
            for &code in &languages {
                let Some(api) = inputs.api_languages.iter().find(|l| l.code == code) else {
                    continue;
                };
                if table.get(target).is_some_and(|names| names.contains_key(code)) {
                    continue;
                }
                stats.needed += 1;

                match self.deps.translator.translate(&api.name, source, target).await {
                    Ok(translation) => {
                        table
                            .entry(target.to_string())
                            .or_default()
                            .insert(code.to_string(), translation.text);
                        stats.done += 1;
                        changed = true;
                    }
                    Err(failure) => {
                        stats.errors += 1;
                        stats.failed.push(TranslationError::new(
                            target,
                            failure.error.to_string(),
                            api.name.clone(),
                        ));
                        if failure.error.aborts_language() {
                            break;
                        }
                    }
                }
            }
        }

        info!(
            needed = stats.needed,
            done = stats.done,
            errors = stats.errors,
            "language names translated"
        );
        changed
    }

    /// Stages 3 and 4.
    async fn translate_context(
        &self,
        context: Context,
        result: &mut WorkerResult,
        inputs: &CycleInputs,
    ) {
        let stage = context.stage();
        self.enter(result, stage).await;
        let timer = self.deps.metrics.span(match context {
            Context::Frontend => metric_names::STAGE_FRONTEND,
            Context::Backend => metric_names::STAGE_BACKEND,
        });

        let mut translations = Translations {
            start_time: Some(Utc::now()),
            ..Default::default()
        };
        let mut failures = Vec::new();

        match inputs.defaults.get(context) {
            Some(required) => {
                self.translate_dictionaries(context, required, inputs, &mut translations, &mut failures)
                    .await
            }
            None => {
                info!(context = %context, "no default dictionary, context skipped");
                translations.successful = false;
            }
        }

        translations.end_time = Some(Utc::now());
        for message in failures {
            result.fail(stage, message);
        }
        timer.finish();
        self.complete(stage, &translations).await;
        *result.translations.get_mut(context) = translations;
    }

    async fn translate_dictionaries(
        &self,
        context: Context,
        required: &Dictionary,
        inputs: &CycleInputs,
        translations: &mut Translations,
        failures: &mut Vec<String>,
    ) {
        let store = &self.deps.store;
        let default_language = self.deps.settings.localization.default_language.as_str();

        let snapshot = match store.load_last_snapshot(context).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(context = %context, error = %e, "snapshot unreadable, treating as missing");
                None
            }
        };
        translations.old_file_found = snapshot.is_some();

        // The default language is only counted; its phrases are the source.
        let empty = Dictionary::new();
        let mut plan = diff(snapshot.as_ref().unwrap_or(&empty), required);
        plan.language_code = default_language.to_string();
        let request = plan.to_request();
        translations.translations_needed += request.total();
        translations.requests.push(request);

        let previous_pending = match store.load_pending(context).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(context = %context, error = %e, "pending phrases unreadable, treating as none");
                PendingPhrases::new()
            }
        };
        let mut pending = PendingPhrases::new();

        for code in &inputs.required_languages {
            let carried = previous_pending.get(code);
            let existing = match store.load(code, context).await {
                Ok(existing) => existing,
                Err(e) => {
                    translations.successful = false;
                    failures.push(format!("loading {} {} failed: {}", context, code, e));
                    if let Some(keys) = carried {
                        pending.insert(code.clone(), keys.clone());
                    }
                    continue;
                }
            };

            let mut plan = plan_language(code, snapshot.as_ref(), required, existing.as_ref());
            if let Some(keys) = carried {
                plan.requeue(keys, required);
            }
            let request = plan.to_request();
            translations.translations_needed += request.total();
            translations.requests.push(request);
            if plan.is_empty() && existing.is_some() {
                continue;
            }

            let outcome = self
                .queue
                .process_language(&plan, required, existing.as_ref(), default_language, &inputs.supported)
                .await;

            if outcome.changed {
                if let Err(e) = store.save(code, context, &outcome.dictionary).await {
                    error!(context = %context, language = %code, error = %e, "dictionary save failed");
                    translations.successful = false;
                    failures.push(format!("saving {} {} failed: {}", context, code, e));
                }
            }
            if !outcome.unapplied.is_empty() {
                pending.insert(code.clone(), outcome.unapplied);
            }
            translations.failed.extend(outcome.errors);
            translations.results.push(outcome.result);
        }

        if pending != previous_pending {
            if let Err(e) = store.save_pending(context, &pending).await {
                error!(context = %context, error = %e, "storing pending phrases failed");
                translations.successful = false;
                failures.push(format!("storing {} pending phrases failed: {}", context, e));
            }
        }

        info!(
            context = %context,
            languages = inputs.required_languages.len(),
            needed = translations.translations_needed,
            failed = translations.failed.len(),
            pending = pending.values().map(|keys| keys.len()).sum::<usize>(),
            "context translated"
        );
    }

    /// Stage 5: snapshots, history cleanup, persistence, back to idle.
    async fn store_changes(&self, result: &mut WorkerResult, inputs: Option<&CycleInputs>) {
        let stage = WorkerStage::StoringChanges;
        self.enter(result, stage).await;
        let timer = self.deps.metrics.span(metric_names::STAGE_STORING);
        result.cleanup.start_time = Some(Utc::now());

        if let Some(inputs) = inputs {
            for context in Context::ALL {
                let Some(required) = inputs.defaults.get(context) else {
                    continue;
                };
                if !result.translations.get(context).successful {
                    info!(context = %context, "context failed, keeping previous snapshot");
                    continue;
                }
                match self.deps.store.save_last_snapshot(context, required).await {
                    Ok(()) => *result.cleanup.snapshot_stored.get_mut(context) = true,
                    Err(e) => result.fail(stage, format!("storing {} snapshot failed: {}", context, e)),
                }
            }
        }

        let days = self.deps.settings.localization.old_logs_delete_after_days;
        match self.deps.sink.cleanup_older_than_days(days).await {
            Ok(removed) => result.cleanup.old_results_deleted = removed,
            Err(e) => result.fail(stage, format!("history cleanup failed: {}", e)),
        }

        result.cleanup.end_time = Some(Utc::now());
        result.finish();
        timer.finish();

        if let Err(e) = self.deps.sink.save(result).await {
            error!(id = %result.id, error = %e, "persisting worker result failed");
            result.fail(stage, format!("persisting result failed: {}", e));
        }

        self.complete(stage, &result.cleanup).await;
        if let Err(e) = self.deps.tracker.transition(WorkerStage::Idle).await {
            warn!(error = %e, "could not return to idle");
        }
    }
}

#[async_trait]
impl Cycle for CycleRunner {
    async fn run(&self) -> WorkerResult {
        CycleRunner::run(self).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use parking_lot::Mutex;

    use super::*;
    use crate::history::HistoryStore;
    use crate::notify::LogNotifier;
    use crate::store::{FileDictionaryStore, StoreError};
    use crate::translate::transport::fake::FakeTransport;
    use crate::translate::{ApiReply, ApiRequest, LibreTranslateClient};

    const LANGUAGES: &str = r#"[
        {"code": "en", "name": "English", "targets": ["de", "fr"]},
        {"code": "de", "name": "German", "targets": ["en", "fr"]},
        {"code": "fr", "name": "French", "targets": ["en", "de"]}
    ]"#;

    /// Echo-style server: "<target>:<q>" for every translation.
    fn server(languages_status: u16) -> FakeTransport {
        FakeTransport::new(move |request: &ApiRequest, _| {
            if request.url().ends_with("/languages") {
                return Ok(ApiReply::new(languages_status, LANGUAGES));
            }
            let q = request.field("q").unwrap_or_default();
            let target = request.field("target").unwrap_or_default();
            let body = serde_json::json!({ "translatedText": format!("{}:{}", target, q) });
            Ok(ApiReply::new(200, body.to_string()))
        })
    }

    /// Lists languages normally but refuses every translation as unsupported.
    fn refusing_server() -> FakeTransport {
        FakeTransport::new(|request: &ApiRequest, _| {
            if request.url().ends_with("/languages") {
                return Ok(ApiReply::new(200, LANGUAGES));
            }
            let target = request.field("target").unwrap_or_default();
            let body = serde_json::json!({ "error": format!("{} is not supported", target) });
            Ok(ApiReply::new(400, body.to_string()))
        })
    }

    fn dict(pairs: &[(&str, &str)]) -> Dictionary {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn deps(root: &Path, store: Arc<dyn DictionaryStore>, transport: FakeTransport) -> CycleDeps {
        let mut settings = Settings::default();
        settings.storage.root = root.to_path_buf();
        settings.translator.retries_on_failure = 1;
        let client = LibreTranslateClient::with_transport(transport, settings.translator.clone());
        CycleDeps {
            settings: Arc::new(settings),
            store,
            translator: Arc::new(client),
            sink: Arc::new(HistoryStore::open_in_memory().unwrap()),
            notifier: Arc::new(LogNotifier),
            tracker: Arc::new(StageTracker::new(Arc::new(LogNotifier))),
            cache: Arc::new(TranslationCache::new(64, std::time::Duration::from_secs(60))),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    async fn seed(store: &FileDictionaryStore) {
        store
            .save("en", Context::Backend, &dict(&[("hello", "Hello"), ("bye", "Bye")]))
            .await
            .unwrap();
        store
            .save("en", Context::Frontend, &dict(&[("title", "Title")]))
            .await
            .unwrap();
        store
            .save("de", Context::Backend, &dict(&[("hello", "Hallo"), ("stale", "Alt")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn full_cycle_translates_and_stores_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileDictionaryStore::at(dir.path()));
        seed(&store).await;
        let deps = deps(dir.path(), store.clone(), server(200));
        let tracker = Arc::clone(&deps.tracker);
        let sink = Arc::clone(&deps.sink);

        let result = CycleRunner::new(deps).run().await;

        assert!(result.successful, "{:?}", result.errors);
        assert_eq!(result.last_status, WorkerStage::StoringChanges);
        assert_eq!(tracker.current(), WorkerStage::Idle);
        assert_eq!(result.cycle_check.libre_languages_count, 3);

        let de_backend = store.load("de", Context::Backend).await.unwrap().unwrap();
        assert_eq!(de_backend, dict(&[("bye", "de:Bye"), ("hello", "Hallo")]));
        // present in backend only, bootstrapped in frontend
        let de_frontend = store.load("de", Context::Frontend).await.unwrap().unwrap();
        assert_eq!(de_frontend, dict(&[("title", "de:Title")]));

        let backend = &result.translations.backend;
        let request = backend.request_for("de").unwrap();
        assert_eq!((request.to_add, request.to_remove, request.to_update), (1, 1, 0));
        assert_eq!(backend.result_for("de").unwrap().successful_count, 1);
        assert!(!backend.old_file_found);
        // first cycle: the default language counts every phrase as added
        let en = backend.request_for("en").unwrap();
        assert_eq!((en.to_add, en.to_remove, en.to_update), (2, 0, 0));

        assert_eq!(
            store.load_last_snapshot(Context::Backend).await.unwrap(),
            Some(dict(&[("hello", "Hello"), ("bye", "Bye")]))
        );
        assert!(result.cleanup.snapshot_stored.frontend && result.cleanup.snapshot_stored.backend);

        let names = store.load_language_names().await.unwrap();
        assert_eq!(names["de"]["en"], "de:English");
        assert!(!names["de"].contains_key("fr"));
        assert_eq!(names["en"]["de"], "German");

        assert_eq!(sink.load_last().await.unwrap().map(|r| r.id), Some(result.id));
    }

    #[tokio::test]
    async fn second_cycle_retranslates_changed_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileDictionaryStore::at(dir.path()));
        seed(&store).await;
        CycleRunner::new(deps(dir.path(), store.clone(), server(200))).run().await;

        store
            .save("en", Context::Backend, &dict(&[("hello", "Hello there"), ("bye", "Bye")]))
            .await
            .unwrap();
        let result = CycleRunner::new(deps(dir.path(), store.clone(), server(200))).run().await;

        let backend = &result.translations.backend;
        assert!(backend.old_file_found);
        let request = backend.request_for("de").unwrap();
        assert_eq!((request.to_add, request.to_remove, request.to_update), (0, 0, 1));
        assert_eq!(
            store.load("de", Context::Backend).await.unwrap().unwrap()["hello"],
            "de:Hello there"
        );
        // default language counted but never translated
        let en = backend.request_for("en").unwrap();
        assert_eq!(en.to_update, 1);
        assert!(backend.result_for("en").is_none());
    }

    #[tokio::test]
    async fn update_survives_an_abandoned_language() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileDictionaryStore::at(dir.path()));
        seed(&store).await;
        CycleRunner::new(deps(dir.path(), store.clone(), server(200))).run().await;

        store
            .save("en", Context::Backend, &dict(&[("hello", "Goodbye"), ("bye", "Bye")]))
            .await
            .unwrap();
        let refused = CycleRunner::new(deps(dir.path(), store.clone(), refusing_server()))
            .run()
            .await;
        assert_eq!(refused.translations.backend.result_for("de").unwrap().successful_count, 0);
        assert!(refused.translations.backend.successful);
        assert_eq!(store.load("de", Context::Backend).await.unwrap().unwrap()["hello"], "Hallo");
        assert!(store.load_pending(Context::Backend).await.unwrap()["de"].contains("hello"));

        let result = CycleRunner::new(deps(dir.path(), store.clone(), server(200))).run().await;

        let request = result.translations.backend.request_for("de").unwrap();
        assert_eq!((request.to_add, request.to_remove, request.to_update), (0, 0, 1));
        assert_eq!(
            store.load("de", Context::Backend).await.unwrap().unwrap()["hello"],
            "de:Goodbye"
        );
        assert!(store.load_pending(Context::Backend).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_server_short_circuits_to_storing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileDictionaryStore::at(dir.path()));
        seed(&store).await;
        let deps = deps(dir.path(), store.clone(), server(403));
        let tracker = Arc::clone(&deps.tracker);

        let result = CycleRunner::new(deps).run().await;

        assert!(!result.successful);
        assert_eq!(result.errors[0].stage_at_failure, WorkerStage::CheckServersAndFiles);
        assert_eq!(result.last_status, WorkerStage::StoringChanges);
        assert!(result.translations.backend.requests.is_empty());
        assert!(result.end_time.is_some());
        assert_eq!(tracker.current(), WorkerStage::Idle);
        assert_eq!(store.load_last_snapshot(Context::Backend).await.unwrap(), None);
        assert_eq!(store.load("de", Context::Frontend).await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_settings_short_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileDictionaryStore::at(dir.path()));
        let mut deps = deps(dir.path(), store, server(200));
        let mut settings = (*deps.settings).clone();
        settings.localization.default_language = "english".into();
        deps.settings = Arc::new(settings);

        let result = CycleRunner::new(deps).run().await;
        assert!(!result.cycle_check.settings_loaded);
        assert!(!result.successful);
        assert_eq!(result.cycle_check.libre_languages_count, 0);
    }

    /// Store whose frontend writes always fail.
    struct FrontendReadOnly(FileDictionaryStore);

    #[async_trait]
    impl DictionaryStore for FrontendReadOnly {
        async fn load(&self, code: &str, context: Context) -> Result<Option<Dictionary>, StoreError> {
            self.0.load(code, context).await
        }
        async fn save(&self, code: &str, context: Context, dictionary: &Dictionary) -> Result<(), StoreError> {
            if context == Context::Frontend {
                return Err(StoreError::Io {
                    path: code.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.0.save(code, context, dictionary).await
        }
        async fn load_last_snapshot(&self, context: Context) -> Result<Option<Dictionary>, StoreError> {
            self.0.load_last_snapshot(context).await
        }
        async fn save_last_snapshot(&self, context: Context, dictionary: &Dictionary) -> Result<(), StoreError> {
            self.0.save_last_snapshot(context, dictionary).await
        }
        async fn list_present_languages(&self, context: Context) -> Result<Vec<String>, StoreError> {
            self.0.list_present_languages(context).await
        }
        async fn load_pending(&self, context: Context) -> Result<PendingPhrases, StoreError> {
            self.0.load_pending(context).await
        }
        async fn save_pending(&self, context: Context, pending: &PendingPhrases) -> Result<(), StoreError> {
            self.0.save_pending(context, pending).await
        }
        async fn load_language_names(&self) -> Result<LanguageNames, StoreError> {
            self.0.load_language_names().await
        }
        async fn save_language_names(&self, names: &LanguageNames) -> Result<(), StoreError> {
            self.0.save_language_names(names).await
        }
    }

    #[tokio::test]
    async fn frontend_store_failure_does_not_block_backend() {
        let dir = tempfile::tempdir().unwrap();
        let inner = FileDictionaryStore::at(dir.path());
        seed(&inner).await;
        let store = Arc::new(FrontendReadOnly(FileDictionaryStore::at(dir.path())));
        let result = CycleRunner::new(deps(dir.path(), store, server(200))).run().await;

        assert!(!result.successful);
        assert!(!result.translations.frontend.successful);
        assert!(result.translations.backend.successful);
        assert!(result
            .errors
            .iter()
            .all(|e| e.stage_at_failure == WorkerStage::TranslatingFrontend));

        assert_eq!(inner.load("de", Context::Backend).await.unwrap().unwrap()["bye"], "de:Bye");
        assert!(result.cleanup.snapshot_stored.backend);
        assert!(!result.cleanup.snapshot_stored.frontend);
        assert_eq!(inner.load_last_snapshot(Context::Frontend).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ignored_and_extra_languages() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileDictionaryStore::at(dir.path()));
        seed(&store).await;
        store.save("ru", Context::Backend, &Dictionary::new()).await.unwrap();
        let mut deps = deps(dir.path(), store.clone(), server(200));
        let mut settings = (*deps.settings).clone();
        settings.localization.ignored_languages = vec!["ru".into()];
        settings.localization.extra_languages = vec!["FR".into()];
        deps.settings = Arc::new(settings);

        let result = CycleRunner::new(deps).run().await;

        assert!(result.cycle_check.ignored_languages_found);
        assert!(result.translations.backend.request_for("ru").is_none());
        assert_eq!(store.load("ru", Context::Backend).await.unwrap(), Some(Dictionary::new()));
        assert_eq!(
            store.load("fr", Context::Frontend).await.unwrap(),
            Some(dict(&[("title", "fr:Title")]))
        );
    }

    /// Records every progress callback.
    #[derive(Default)]
    struct EventLog(Mutex<Vec<String>>);

    #[async_trait]
    impl ProgressNotifier for EventLog {
        async fn on_cycle_started(&self) {
            self.0.lock().push("started".into());
        }
        async fn on_status_changed(&self, stage: WorkerStage) {
            self.0.lock().push(format!("status:{}", stage));
        }
        async fn on_stage_completed(&self, stage: WorkerStage, _results: serde_json::Value) {
            self.0.lock().push(format!("done:{}", stage));
        }
    }

    #[tokio::test]
    async fn progress_events_follow_stage_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileDictionaryStore::at(dir.path()));
        seed(&store).await;
        let log = Arc::new(EventLog::default());
        let mut deps = deps(dir.path(), store, server(200));
        deps.notifier = log.clone();
        deps.tracker = Arc::new(StageTracker::new(log.clone()));

        CycleRunner::new(deps).run().await;

        let events = log.0.lock().clone();
        assert_eq!(
            events,
            vec![
                "started",
                "status:CheckServersAndFiles",
                "done:CheckServersAndFiles",
                "status:CheckLanguagesTranslations",
                "done:CheckLanguagesTranslations",
                "status:TranslatingFrontend",
                "done:TranslatingFrontend",
                "status:TranslatingBackend",
                "done:TranslatingBackend",
                "status:StoringChanges",
                "done:StoringChanges",
                "status:Idle",
            ]
        );
    }
}
