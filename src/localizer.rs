//! Synchronous lookup facade for callers outside the async runtime
//! (template engines, validation message providers).
//!
//! Reads the stored dictionary; a missing key is translated on the engine's
//! runtime and the caller's thread blocks on a oneshot until it is done.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::store::{DictionaryStore, StoreError};
use crate::translate::cache::TranslationCache;
use crate::translate::Translator;
use crate::worker_result::Context;

#[derive(Debug, thiserror::Error)]
pub enum LocalizerError {
    #[error("blocking lookup called from inside the async runtime")]
    InsideRuntime,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("lookup task was cancelled")]
    Cancelled,
}

pub struct Localizer {
    handle: Handle,
    store: Arc<dyn DictionaryStore>,
    translator: Arc<dyn Translator>,
    cache: Arc<TranslationCache>,
    context: Context,
    default_language: String,
}

impl Localizer {
    pub fn new(
        handle: Handle,
        store: Arc<dyn DictionaryStore>,
        translator: Arc<dyn Translator>,
        cache: Arc<TranslationCache>,
        context: Context,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            store,
            translator,
            cache,
            context,
            default_language: default_language.into(),
        }
    }

    /// Phrase for `key` in `lang`. Blocks the calling thread.
    ///
    /// Falls back to the default-language phrase (or the key itself) when the
    /// translation fails.
    pub fn get(&self, key: &str, lang: &str) -> Result<String, LocalizerError> {
        if Handle::try_current().is_ok() {
            return Err(LocalizerError::InsideRuntime);
        }

        let (tx, rx) = oneshot::channel();
        let lookup = Lookup {
            store: Arc::clone(&self.store),
            translator: Arc::clone(&self.translator),
            cache: Arc::clone(&self.cache),
            context: self.context,
            default_language: self.default_language.clone(),
            key: key.to_string(),
            lang: lang.to_ascii_lowercase(),
        };
        self.handle.spawn(async move {
            let _ = tx.send(lookup.run().await);
        });
        rx.blocking_recv().map_err(|_| LocalizerError::Cancelled)?
    }
}

struct Lookup {
    store: Arc<dyn DictionaryStore>,
    translator: Arc<dyn Translator>,
    cache: Arc<TranslationCache>,
    context: Context,
    default_language: String,
    key: String,
    lang: String,
}

impl Lookup {
    async fn run(self) -> Result<String, LocalizerError> {
        if let Some(phrase) = self
            .store
            .load(&self.lang, self.context)
            .await?
            .and_then(|mut d| d.remove(&self.key))
        {
            return Ok(phrase);
        }

        let source = self
            .store
            .load(&self.default_language, self.context)
            .await?
            .and_then(|mut d| d.remove(&self.key))
            .unwrap_or_else(|| self.key.clone());
        if self.lang == self.default_language || source.trim().is_empty() {
            return Ok(source);
        }

        let cache_key = TranslationCache::compute_key(&self.default_language, &self.lang, &source);
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit);
        }

        match self
            .translator
            .translate(&source, &self.default_language, &self.lang)
            .await
        {
            Ok(translation) => {
                debug!(key = %self.key, language = %self.lang, "missing phrase translated on demand");
                self.cache.insert(cache_key, translation.text.clone());
                Ok(translation.text)
            }
            Err(failure) => {
                warn!(key = %self.key, language = %self.lang, error = %failure.error, "on-demand translation failed");
                Ok(failure.fallback_text)
            }
        }
    }
}
