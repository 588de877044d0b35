//! Translation queue processor.
//! Turns one language's diff plan into an updated dictionary: removals first,
//! then `to_add ∪ to_update` in key order, chunked by `batch_size` with at most
//! `max_parallel_requests` calls in flight per chunk.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::diff::DiffPlan;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::translate::cache::TranslationCache;
use crate::translate::{TranslateError, TranslateFailure, Translator};
use crate::worker_result::{Dictionary, TranslationError, TranslationResult};

/// What processing one language produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageOutcome {
    pub dictionary: Dictionary,
    pub result: TranslationResult,
    pub errors: Vec<TranslationError>,
    /// The language was abandoned (unsupported pair or target).
    pub aborted: bool,
    /// `dictionary` differs from what is stored and should be saved.
    pub changed: bool,
    /// Keys whose translation was not applied (fallback written or language
    /// abandoned); re-queued as updates on the next cycle.
    pub unapplied: BTreeSet<String>,
}

pub struct QueueProcessor {
    translator: Arc<dyn Translator>,
    cache: Arc<TranslationCache>,
    metrics: Arc<MetricsRegistry>,
    batch_size: usize,
    max_parallel: usize,
}

impl QueueProcessor {
    pub fn new(
        translator: Arc<dyn Translator>,
        cache: Arc<TranslationCache>,
        metrics: Arc<MetricsRegistry>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            translator,
            cache,
            metrics,
            batch_size: config.batch_size.max(1),
            max_parallel: config.max_parallel_requests.max(1),
        }
    }

    /// Apply `plan` to the language's `existing` dictionary.
    ///
    /// `required` is the default-language dictionary the phrases are translated
    /// from; `supported` is the server's language list (empty means unknown, in
    /// which case every target is attempted).
    pub async fn process_language(
        &self,
        plan: &DiffPlan,
        required: &Dictionary,
        existing: Option<&Dictionary>,
        source: &str,
        supported: &[String],
    ) -> LanguageOutcome {
        let target = plan.language_code.as_str();
        let span = self.metrics.span(metric_names::LANGUAGE);

        let mut base = existing.cloned().unwrap_or_default();
        for key in &plan.to_remove {
            base.remove(key);
        }
        let removed = !plan.to_remove.is_empty();

        let keys: Vec<&String> = plan
            .keys_to_translate()
            .filter(|k| required.contains_key(*k))
            .collect();

        let mut result = TranslationResult {
            language_code: target.to_string(),
            ..Default::default()
        };

        if !supported.is_empty() && !supported.iter().any(|code| code == target) {
            warn!(language = target, phrases = keys.len(), "target not supported by server");
            let errors = keys
                .iter()
                .map(|k| {
                    TranslationError::new(
                        target,
                        format!("language {} is not supported by the server", target),
                        required[*k].clone(),
                    )
                })
                .collect::<Vec<_>>();
            result
                .errors
                .push(format!("language not supported, {} phrases skipped", keys.len()));
            self.metrics
                .increment(metric_names::PHRASES_FAILED, errors.len() as u64);
            span.finish();
            return LanguageOutcome {
                dictionary: base,
                result,
                errors,
                aborted: true,
                changed: removed,
                unapplied: keys.into_iter().cloned().collect(),
            };
        }

        let mut dictionary = base.clone();
        let mut errors = Vec::new();
        let mut aborted: Option<TranslateError> = None;
        let mut written = 0usize;
        let mut unapplied = BTreeSet::new();

        'chunks: for chunk in keys.chunks(self.batch_size) {
            let calls: Vec<_> = chunk
                .iter()
                .map(|key| self.translate_phrase(&required[*key], source, target))
                .collect();
            let outcomes: Vec<Result<String, TranslateFailure>> = stream::iter(calls)
                .buffered(self.max_parallel)
                .collect()
                .await;

            for (key, outcome) in chunk.iter().zip(outcomes) {
                match outcome {
                    Ok(text) => {
                        dictionary.insert((*key).clone(), text);
                        result.successful_count += 1;
                        written += 1;
                    }
                    Err(failure) if failure.error.aborts_language() => {
                        aborted = Some(failure.error);
                        break 'chunks;
                    }
                    Err(failure) => {
                        debug!(language = target, key = %key, error = %failure.error, "phrase failed, writing fallback");
                        result.errors.push(format!("{}: {}", key, failure.error));
                        errors.push(TranslationError::new(
                            target,
                            failure.error.to_string(),
                            required[*key].clone(),
                        ));
                        dictionary.insert((*key).clone(), failure.fallback_text);
                        unapplied.insert((*key).clone());
                        written += 1;
                    }
                }
            }
        }

        if let Some(error) = aborted {
            warn!(language = target, error = %error, "language abandoned");
            let skipped = keys.len() - result.successful_count - errors.len();
            result.successful_count = 0;
            result.errors.push(format!("{}, {} phrases skipped", error, skipped));
            errors = keys
                .iter()
                .map(|k| TranslationError::new(target, error.to_string(), required[*k].clone()))
                .collect();
            self.metrics
                .increment(metric_names::PHRASES_FAILED, errors.len() as u64);
            span.finish();
            return LanguageOutcome {
                dictionary: base,
                result,
                errors,
                aborted: true,
                changed: removed,
                unapplied: keys.into_iter().cloned().collect(),
            };
        }

        self.metrics
            .increment(metric_names::PHRASES_TRANSLATED, result.successful_count as u64);
        self.metrics
            .increment(metric_names::PHRASES_FAILED, errors.len() as u64);
        span.finish();

        info!(
            language = target,
            removed = plan.to_remove.len(),
            translated = result.successful_count,
            failed = errors.len(),
            "language processed"
        );

        LanguageOutcome {
            dictionary,
            result,
            errors,
            aborted: false,
            changed: removed || written > 0 || existing.is_none(),
            unapplied,
        }
    }

    async fn translate_phrase(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<String, TranslateFailure> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let key = TranslationCache::compute_key(source, target, text);
        if let Some(hit) = self.cache.get(&key) {
            self.metrics.increment(metric_names::CACHE_HITS, 1);
            return Ok(hit);
        }

        let span = self.metrics.span(metric_names::PHRASE);
        let outcome = self.translator.translate(text, source, target).await;
        span.finish();

        let translation = outcome?;
        self.cache.insert(key, translation.text.clone());
        Ok(translation.text)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::diff::plan_language;
    use crate::translate::{ApiLanguage, Detection, TranslatedFile, Translation};

    /// Upper-cases text; "boom" fails, target "zz" is an unsupported pair.
    #[derive(Default)]
    struct ScriptedTranslator {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Translator for ScriptedTranslator {
        async fn translate(
            &self,
            text: &str,
            source: &str,
            target: &str,
        ) -> Result<Translation, TranslateFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if target == "zz" {
                return Err(TranslateFailure::new(
                    TranslateError::UnsupportedPair {
                        from_lang: source.into(),
                        to_lang: target.into(),
                    },
                    text,
                ));
            }
            if text == "boom" {
                return Err(TranslateFailure::new(
                    TranslateError::Transient {
                        attempts: 3,
                        last: "HTTP 502".into(),
                    },
                    text,
                ));
            }
            Ok(Translation {
                text: format!("{}-{}", target, text.to_uppercase()),
                attempts: 1,
                lowercased_retry: false,
            })
        }

        async fn translate_auto(
            &self,
            text: &str,
            target: &str,
        ) -> Result<Translation, TranslateFailure> {
            self.translate(text, "en", target).await
        }

        async fn detect_language(&self, _text: &str) -> Result<Vec<Detection>, TranslateError> {
            Ok(Vec::new())
        }

        async fn available_languages(&self) -> Result<Vec<ApiLanguage>, TranslateError> {
            Ok(Vec::new())
        }

        async fn translate_file(
            &self,
            _content: Vec<u8>,
            _file_name: &str,
            _source: &str,
            _target: &str,
        ) -> Result<TranslatedFile, TranslateError> {
            Err(TranslateError::InvalidInput("not scripted".into()))
        }
    }

    fn dict(pairs: &[(&str, &str)]) -> Dictionary {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn processor(translator: Arc<ScriptedTranslator>, batch: usize, parallel: usize) -> QueueProcessor {
        QueueProcessor::new(
            translator,
            Arc::new(TranslationCache::new(64, Duration::from_secs(60))),
            Arc::new(MetricsRegistry::new()),
            &QueueConfig {
                batch_size: batch,
                max_parallel_requests: parallel,
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn applies_removals_adds_and_updates() {
        let translator = Arc::new(ScriptedTranslator::default());
        let queue = processor(translator.clone(), 16, 1);
        let old = dict(&[("a", "A"), ("b", "B"), ("c", "C")]);
        let required = dict(&[("a", "A"), ("b", "B2"), ("d", "D")]);
        let existing = dict(&[("a", "x"), ("b", "y"), ("c", "z")]);
        let plan = plan_language("de", Some(&old), &required, Some(&existing));

        let outcome = queue
            .process_language(&plan, &required, Some(&existing), "en", &[])
            .await;

        assert_eq!(
            outcome.dictionary,
            dict(&[("a", "x"), ("b", "de-B2"), ("d", "de-D")])
        );
        assert_eq!(outcome.result.successful_count, 2);
        assert!(outcome.errors.is_empty());
        assert!(outcome.changed && !outcome.aborted);
        assert!(outcome.unapplied.is_empty());
        assert_eq!(translator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_phrase_gets_fallback_and_processing_continues() {
        let translator = Arc::new(ScriptedTranslator::default());
        let queue = processor(translator, 2, 1);
        let required = dict(&[("k1", "one"), ("k2", "boom"), ("k3", "three")]);
        let plan = plan_language("fr", None, &required, None);

        let outcome = queue.process_language(&plan, &required, None, "en", &[]).await;

        assert_eq!(outcome.dictionary["k2"], "boom");
        assert_eq!(outcome.dictionary["k3"], "fr-THREE");
        assert_eq!(outcome.result.successful_count, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].original_text, "boom");
        assert_eq!(outcome.errors[0].target_language, "fr");
        assert_eq!(outcome.unapplied, BTreeSet::from(["k2".to_string()]));
        assert!(outcome.result.successful_count <= plan.to_add.len() + plan.to_update.len());
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_pair_abandons_language() {
        let translator = Arc::new(ScriptedTranslator::default());
        let queue = processor(translator, 16, 1);
        let required = dict(&[("a", "A"), ("b", "B")]);
        let existing = dict(&[("a", "old"), ("gone", "x")]);
        let plan = plan_language("zz", None, &required, Some(&existing));

        let outcome = queue
            .process_language(&plan, &required, Some(&existing), "en", &[])
            .await;

        assert!(outcome.aborted);
        assert_eq!(outcome.dictionary, dict(&[("a", "old")]));
        assert_eq!(outcome.result.successful_count, 0);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.unapplied, BTreeSet::from(["b".to_string()]));
        assert!(outcome.changed);
    }

    #[tokio::test(start_paused = true)]
    async fn target_missing_from_server_list_makes_no_calls() {
        let translator = Arc::new(ScriptedTranslator::default());
        let queue = processor(translator.clone(), 16, 1);
        let required = dict(&[("a", "A")]);
        let plan = plan_language("sv", None, &required, None);
        let supported = vec!["en".to_string(), "de".to_string()];

        let outcome = queue
            .process_language(&plan, &required, None, "en", &supported)
            .await;

        assert!(outcome.aborted);
        assert!(!outcome.changed);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.unapplied, BTreeSet::from(["a".to_string()]));
        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_avoids_repeat_calls() {
        let translator = Arc::new(ScriptedTranslator::default());
        let queue = processor(translator.clone(), 16, 1);
        let required = dict(&[("greeting", "Hello"), ("again", "Hello")]);
        let plan = plan_language("it", None, &required, None);

        let outcome = queue.process_language(&plan, &required, None, "en", &[]).await;
        assert_eq!(outcome.result.successful_count, 2);
        assert_eq!(translator.calls.load(Ordering::SeqCst), 1);

        queue.process_language(&plan, &required, None, "en", &[]).await;
        assert_eq!(translator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parallelism_is_bounded() {
        let translator = Arc::new(ScriptedTranslator::default());
        let queue = processor(translator.clone(), 8, 3);
        let required: Dictionary = (0..20)
            .map(|i| (format!("key{:02}", i), format!("text {}", i)))
            .collect();
        let plan = plan_language("es", None, &required, None);

        let outcome = queue.process_language(&plan, &required, None, "en", &[]).await;

        assert_eq!(outcome.result.successful_count, 20);
        assert_eq!(translator.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_source_text_is_copied() {
        let translator = Arc::new(ScriptedTranslator::default());
        let queue = processor(translator.clone(), 16, 1);
        let required = dict(&[("blank", "")]);
        let plan = DiffPlan {
            language_code: "pl".into(),
            to_add: BTreeSet::from(["blank".to_string()]),
            ..Default::default()
        };

        let outcome = queue.process_language(&plan, &required, None, "en", &[]).await;
        assert_eq!(outcome.dictionary["blank"], "");
        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }
}
