//! Dictionary store: per-language locale dictionaries for each context plus
//! the "last known" snapshot of the source dictionary used for diffing.

pub mod fs;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tracing::warn;

use crate::worker_result::{Context, Dictionary};

pub use fs::FileDictionaryStore;

/// All dictionaries of one context keyed by language code.
pub type DictionaryTree = BTreeMap<String, Dictionary>;

/// Keys whose translation was not applied, per language code.
pub type PendingPhrases = BTreeMap<String, BTreeSet<String>>;

/// Localized language display names: target language → (language code → name).
pub type LanguageNames = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed dictionary {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid language code {0:?}")]
    InvalidCode(String),
}

/// Read/write surface shared by the engine and the transport layer.
/// Saves must be atomic for concurrent readers.
#[async_trait]
pub trait DictionaryStore: Send + Sync {
    /// `Ok(None)` when the language has no dictionary in this context.
    async fn load(&self, code: &str, context: Context) -> Result<Option<Dictionary>, StoreError>;

    async fn save(&self, code: &str, context: Context, dictionary: &Dictionary)
        -> Result<(), StoreError>;

    async fn load_last_snapshot(&self, context: Context) -> Result<Option<Dictionary>, StoreError>;

    async fn save_last_snapshot(
        &self,
        context: Context,
        dictionary: &Dictionary,
    ) -> Result<(), StoreError>;

    /// Language codes with a dictionary in this context, sorted.
    async fn list_present_languages(&self, context: Context) -> Result<Vec<String>, StoreError>;

    /// Empty when nothing is pending.
    async fn load_pending(&self, context: Context) -> Result<PendingPhrases, StoreError>;

    async fn save_pending(&self, context: Context, pending: &PendingPhrases) -> Result<(), StoreError>;

    async fn load_language_names(&self) -> Result<LanguageNames, StoreError>;

    async fn save_language_names(&self, names: &LanguageNames) -> Result<(), StoreError>;

    /// Every dictionary of a context as a tree.
    async fn load_all(&self, context: Context) -> Result<DictionaryTree, StoreError> {
        let mut tree = DictionaryTree::new();
        for code in self.list_present_languages(context).await? {
            let dictionary = self.load(&code, context).await?.unwrap_or_default();
            tree.insert(code, dictionary);
        }
        Ok(tree)
    }

    /// Bulk save; reports success per language instead of stopping at the first failure.
    async fn save_all(&self, context: Context, tree: &DictionaryTree) -> BTreeMap<String, bool> {
        let mut outcome = BTreeMap::new();
        for (code, dictionary) in tree {
            let saved = match self.save(code, context, dictionary).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(language = %code, context = %context, error = %e, "bulk save failed");
                    false
                }
            };
            outcome.insert(code.clone(), saved);
        }
        outcome
    }
}
