//! JSON-file dictionary store.
//!
//! Layout under `root`:
//! - `<backend_dir>/<xx>.json` and `<frontend_dir>/<xx>.json`: locale dictionaries
//! - `<snapshot_dir>/old.json`, `<snapshot_dir>/old_client.json`: last snapshots
//! - `<snapshot_dir>/pending.json`, `<snapshot_dir>/pending_client.json`: keys
//!   whose translation has not been applied yet, per language
//! - `<snapshot_dir>/language_names.json`: localized language names
//!
//! Locale file names are lower-case; `DE.json` is not a locale file.
//!
//! Writes go to a sibling temp file that is renamed over the target, so a
//! reader sees either the previous or the new file, never a partial one.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::{DictionaryStore, LanguageNames, PendingPhrases, StoreError};
use crate::config::{is_language_code, StorageConfig};
use crate::worker_result::{Context, Dictionary};

const BACKEND_SNAPSHOT: &str = "old.json";
const FRONTEND_SNAPSHOT: &str = "old_client.json";
const BACKEND_PENDING: &str = "pending.json";
const FRONTEND_PENDING: &str = "pending_client.json";
const LANGUAGE_NAMES: &str = "language_names.json";

fn locale_file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([a-z]{2})\.json$").expect("valid locale file regex"))
}

pub struct FileDictionaryStore {
    frontend_dir: PathBuf,
    backend_dir: PathBuf,
    snapshot_dir: PathBuf,
}

impl FileDictionaryStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            frontend_dir: config.root.join(&config.frontend_dir),
            backend_dir: config.root.join(&config.backend_dir),
            snapshot_dir: config.root.join(&config.snapshot_dir),
        }
    }

    /// Store rooted at `root` with the default directory names.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self::new(&StorageConfig {
            root: root.into(),
            ..Default::default()
        })
    }

    fn context_dir(&self, context: Context) -> &Path {
        match context {
            Context::Frontend => &self.frontend_dir,
            Context::Backend => &self.backend_dir,
        }
    }

    fn dictionary_path(&self, code: &str, context: Context) -> Result<PathBuf, StoreError> {
        if !is_language_code(code) {
            return Err(StoreError::InvalidCode(code.to_string()));
        }
        Ok(self
            .context_dir(context)
            .join(format!("{}.json", code.to_ascii_lowercase())))
    }

    fn snapshot_path(&self, context: Context) -> PathBuf {
        let name = match context {
            Context::Frontend => FRONTEND_SNAPSHOT,
            Context::Backend => BACKEND_SNAPSHOT,
        };
        self.snapshot_dir.join(name)
    }

    fn pending_path(&self, context: Context) -> PathBuf {
        let name = match context {
            Context::Frontend => FRONTEND_PENDING,
            Context::Backend => BACKEND_PENDING,
        };
        self.snapshot_dir.join(name)
    }
}

#[async_trait]
impl DictionaryStore for FileDictionaryStore {
    async fn load(&self, code: &str, context: Context) -> Result<Option<Dictionary>, StoreError> {
        let path = self.dictionary_path(code, context)?;
        read_json(&path).await
    }

    async fn save(
        &self,
        code: &str,
        context: Context,
        dictionary: &Dictionary,
    ) -> Result<(), StoreError> {
        let path = self.dictionary_path(code, context)?;
        write_json_atomic(&path, dictionary).await?;
        debug!(language = code, context = %context, keys = dictionary.len(), "dictionary saved");
        Ok(())
    }

    async fn load_last_snapshot(&self, context: Context) -> Result<Option<Dictionary>, StoreError> {
        read_json(&self.snapshot_path(context)).await
    }

    async fn save_last_snapshot(
        &self,
        context: Context,
        dictionary: &Dictionary,
    ) -> Result<(), StoreError> {
        let path = self.snapshot_path(context);
        write_json_atomic(&path, dictionary).await?;
        info!(context = %context, keys = dictionary.len(), "snapshot stored");
        Ok(())
    }

    async fn list_present_languages(&self, context: Context) -> Result<Vec<String>, StoreError> {
        let dir = self.context_dir(context);
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "locale directory missing");
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_error(dir, e)),
        };

        let mut codes = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(caps) = locale_file_pattern().captures(name) {
                codes.push(caps[1].to_string());
            }
        }
        codes.sort();
        codes.dedup();
        Ok(codes)
    }

    async fn load_pending(&self, context: Context) -> Result<PendingPhrases, StoreError> {
        Ok(read_json(&self.pending_path(context)).await?.unwrap_or_default())
    }

    async fn save_pending(&self, context: Context, pending: &PendingPhrases) -> Result<(), StoreError> {
        write_json_atomic(&self.pending_path(context), pending).await?;
        debug!(context = %context, languages = pending.len(), "pending phrases stored");
        Ok(())
    }

    async fn load_language_names(&self) -> Result<LanguageNames, StoreError> {
        Ok(read_json(&self.snapshot_dir.join(LANGUAGE_NAMES))
            .await?
            .unwrap_or_default())
    }

    async fn save_language_names(&self, names: &LanguageNames) -> Result<(), StoreError> {
        write_json_atomic(&self.snapshot_dir.join(LANGUAGE_NAMES), names).await
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Missing file → `Ok(None)`; empty file → default value.
async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<Option<T>, StoreError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    if content.trim().is_empty() {
        return Ok(Some(T::default()));
    }
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.display().to_string(),
            source,
        })
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("dictionary");
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
    if let Err(e) = tokio::fs::write(&tmp, &json).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DictionaryTree;

    fn dict(pairs: &[(&str, &str)]) -> Dictionary {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn save_then_load_per_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at(dir.path());
        let de = dict(&[("Hello", "Hallo")]);

        store.save("de", Context::Backend, &de).await.unwrap();
        assert_eq!(store.load("de", Context::Backend).await.unwrap(), Some(de));
        assert_eq!(store.load("de", Context::Frontend).await.unwrap(), None);
    }

    #[tokio::test]
    async fn lists_only_two_letter_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at(dir.path());
        store.save("fr", Context::Frontend, &Dictionary::new()).await.unwrap();
        store.save("DE", Context::Frontend, &Dictionary::new()).await.unwrap();
        let locales = dir.path().join("LocalesClient");
        std::fs::write(locales.join("notes.json"), "{}").unwrap();
        std::fs::write(locales.join("pt-BR.json"), "{}").unwrap();
        std::fs::write(locales.join("IT.json"), "{}").unwrap();

        let codes = store.list_present_languages(Context::Frontend).await.unwrap();
        assert_eq!(codes, vec!["de".to_string(), "fr".to_string()]);
        assert!(store.list_present_languages(Context::Backend).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at(dir.path());
        assert_eq!(store.load_last_snapshot(Context::Frontend).await.unwrap(), None);

        let snap = dict(&[("hello", "Hello")]);
        store.save_last_snapshot(Context::Frontend, &snap).await.unwrap();
        assert_eq!(store.load_last_snapshot(Context::Frontend).await.unwrap(), Some(snap));
        assert_eq!(store.load_last_snapshot(Context::Backend).await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalid_code_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at(dir.path());
        let err = store.save("../x", Context::Backend, &Dictionary::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidCode(_)));
    }

    #[tokio::test]
    async fn malformed_file_is_an_error_and_empty_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at(dir.path());
        let locales = dir.path().join("Locales");
        std::fs::create_dir_all(&locales).unwrap();
        std::fs::write(locales.join("it.json"), "{ not json").unwrap();
        std::fs::write(locales.join("es.json"), "").unwrap();

        assert!(matches!(
            store.load("it", Context::Backend).await,
            Err(StoreError::Json { .. })
        ));
        assert_eq!(store.load("es", Context::Backend).await.unwrap(), Some(Dictionary::new()));
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at(dir.path());
        store.save("nl", Context::Backend, &dict(&[("a", "b")])).await.unwrap();
        store.save("nl", Context::Backend, &dict(&[("a", "c")])).await.unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path().join("Locales"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["nl.json".to_string()]);
    }

    #[tokio::test]
    async fn tree_load_and_bulk_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at(dir.path());
        let mut tree = DictionaryTree::new();
        tree.insert("de".into(), dict(&[("Yes", "Ja")]));
        tree.insert("bad!".into(), Dictionary::new());

        let outcome = store.save_all(Context::Backend, &tree).await;
        assert_eq!(outcome.get("de"), Some(&true));
        assert_eq!(outcome.get("bad!"), Some(&false));

        let loaded = store.load_all(Context::Backend).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["de"]["Yes"], "Ja");
    }

    #[tokio::test]
    async fn upper_case_file_is_not_a_locale() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at(dir.path());
        let locales = dir.path().join("Locales");
        std::fs::create_dir_all(&locales).unwrap();
        std::fs::write(locales.join("SV.json"), r#"{"a":"b"}"#).unwrap();

        // listing and loading agree on the lower-case name
        assert!(store.list_present_languages(Context::Backend).await.unwrap().is_empty());
        store.save("sv", Context::Backend, &dict(&[("a", "c")])).await.unwrap();
        assert_eq!(
            store.list_present_languages(Context::Backend).await.unwrap(),
            vec!["sv".to_string()]
        );
        assert_eq!(store.load("SV", Context::Backend).await.unwrap(), Some(dict(&[("a", "c")])));
    }

    #[tokio::test]
    async fn pending_phrases_per_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at(dir.path());
        assert!(store.load_pending(Context::Backend).await.unwrap().is_empty());

        let mut pending = PendingPhrases::new();
        pending.entry("de".into()).or_default().insert("hello".into());
        store.save_pending(Context::Backend, &pending).await.unwrap();

        assert_eq!(store.load_pending(Context::Backend).await.unwrap(), pending);
        assert!(store.load_pending(Context::Frontend).await.unwrap().is_empty());
        assert!(dir.path().join("snapshots").join("pending.json").exists());
    }

    #[tokio::test]
    async fn language_names_default_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at(dir.path());
        assert!(store.load_language_names().await.unwrap().is_empty());

        let mut names = LanguageNames::new();
        names.entry("de".into()).or_default().insert("fr".into(), "Französisch".into());
        store.save_language_names(&names).await.unwrap();
        assert_eq!(store.load_language_names().await.unwrap(), names);
    }
}
