//! locale-sync: background engine that keeps frontend and backend locale
//! dictionaries in sync with the default language through machine translation.
//! Library root: module registration, tracing setup and engine wiring.

pub mod config;
pub mod cycle;
pub mod diff;
pub mod history;
pub mod localizer;
pub mod metrics;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod state_machine;
pub mod store;
pub mod translate;
pub mod worker_result;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use config::Settings;
use cycle::EngineCycleFactory;
use history::{HistoryError, HistoryStore};
use localizer::Localizer;
use metrics::MetricsRegistry;
use notify::{FanOut, LogNotifier, ProgressHub, ProgressNotifier};
use scheduler::{Scheduler, TickOutcome};
use state_machine::StageTracker;
use store::FileDictionaryStore;
use translate::cache::TranslationCache;
use translate::{LibreTranslateClient, TranslateError};
use worker_result::Context;

pub const LOG_JSON_ENV: &str = "LOCALE_SYNC_LOG_JSON";

/// Install the global subscriber. `RUST_LOG` wins over the default filter;
/// `LOCALE_SYNC_LOG_JSON=1` switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("locale_sync=debug,info"));
    let json = std::env::var(LOG_JSON_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    // try_init: a second call (tests, embedding hosts) keeps the first subscriber
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Long-lived components shared by every cycle.
pub struct Engine {
    pub settings: Arc<Settings>,
    pub tracker: Arc<StageTracker>,
    pub progress: Arc<ProgressHub>,
    pub history: Arc<HistoryStore>,
    pub cache: Arc<TranslationCache>,
    pub metrics: Arc<MetricsRegistry>,
    pub scheduler: Arc<Scheduler>,
}

impl Engine {
    pub fn new(settings: Settings) -> Result<Self, HistoryError> {
        let settings = Arc::new(settings);
        let metrics = Arc::new(MetricsRegistry::new());
        let progress = Arc::new(ProgressHub::new(64));
        let notifier: Arc<dyn ProgressNotifier> = Arc::new(FanOut(vec![
            Arc::clone(&progress) as Arc<dyn ProgressNotifier>,
            Arc::new(LogNotifier),
        ]));
        let tracker = Arc::new(StageTracker::new(Arc::clone(&notifier)));

        let history_path = settings.storage.root.join(&settings.storage.history_db);
        let history = Arc::new(HistoryStore::open(&history_path)?);

        let queue = &settings.queue;
        let cache = Arc::new(TranslationCache::new(
            queue.cache_capacity,
            Duration::from_secs(queue.cache_ttl_minutes * 60),
        ));

        let factory = Arc::new(EngineCycleFactory {
            settings: Arc::clone(&settings),
            sink: Arc::clone(&history) as _,
            notifier,
            tracker: Arc::clone(&tracker),
            cache: Arc::clone(&cache),
            metrics: Arc::clone(&metrics),
        });
        let scheduler = Arc::new(Scheduler::new(factory, Arc::clone(&metrics)));

        info!(
            root = %settings.storage.root.display(),
            translator = %settings.translator.host,
            "engine ready"
        );

        Ok(Self {
            settings,
            tracker,
            progress,
            history,
            cache,
            metrics,
            scheduler,
        })
    }

    /// Cycle every `minutes_between_cycles` until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let interval = self.settings.localization.cycle_interval();
        Arc::clone(&self.scheduler).run(interval, shutdown).await;
    }

    /// A single cycle, for one-shot invocations.
    pub async fn run_once(&self) -> TickOutcome {
        self.scheduler.tick().await
    }

    /// Blocking lookup facade over the same store, cache and translator settings.
    pub fn localizer(
        &self,
        handle: tokio::runtime::Handle,
        context: Context,
    ) -> Result<Localizer, TranslateError> {
        let client = LibreTranslateClient::from_config(self.settings.translator.clone())?;
        Ok(Localizer::new(
            handle,
            Arc::new(FileDictionaryStore::new(&self.settings.storage)),
            Arc::new(client),
            Arc::clone(&self.cache),
            context,
            self.settings.localization.default_language.clone(),
        ))
    }
}
