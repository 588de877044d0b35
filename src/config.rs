//! Settings loaded from a TOML file with environment overrides.
//!
//! Sections mirror the deployment config: `[localization]`, `[translator]`,
//! `[queue]` and `[storage]`. Every field has a default so a missing file or a
//! partial file still yields a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const CONFIG_PATH_ENV: &str = "LOCALE_SYNC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "locale-sync.toml";

/// Fallback interval when `minutes_between_cycles` is 0.
const FALLBACK_MINUTES: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub localization: LocalizationConfig,
    #[serde(default)]
    pub translator: TranslatorConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    /// Source language of the required phrases (ISO 639-1).
    pub default_language: String,
    /// Codes never translated nor bootstrapped.
    pub ignored_languages: Vec<String>,
    /// Codes bootstrapped even without a locale file in either context.
    pub extra_languages: Vec<String>,
    pub minutes_between_cycles: u64,
    pub old_logs_delete_after_days: u32,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            default_language: "en".into(),
            ignored_languages: Vec::new(),
            extra_languages: Vec::new(),
            minutes_between_cycles: 60,
            old_logs_delete_after_days: 30,
        }
    }
}

impl LocalizationConfig {
    pub fn cycle_interval(&self) -> Duration {
        let minutes = if self.minutes_between_cycles == 0 {
            FALLBACK_MINUTES
        } else {
            self.minutes_between_cycles
        };
        Duration::from_secs(minutes * 60)
    }

    pub fn is_ignored(&self, code: &str) -> bool {
        self.ignored_languages
            .iter()
            .any(|c| c.eq_ignore_ascii_case(code))
    }
}

/// LibreTranslate-compatible endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub host: String,
    pub api_key: String,
    pub needs_key: bool,
    pub retries_on_failure: u32,
    pub wait_seconds_before_retry: u64,
    pub request_timeout_seconds: u64,
    pub translate_endpoint: String,
    pub detect_language_endpoint: String,
    pub languages_endpoint: String,
    pub translate_file_endpoint: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:5000".into(),
            api_key: String::new(),
            needs_key: false,
            retries_on_failure: 3,
            wait_seconds_before_retry: 1,
            request_timeout_seconds: 30,
            translate_endpoint: "/translate".into(),
            detect_language_endpoint: "/detect".into(),
            languages_endpoint: "/languages".into(),
            translate_file_endpoint: "/translate_file".into(),
        }
    }
}

impl TranslatorConfig {
    /// Total attempts per request; 0 is treated as a single attempt.
    pub fn max_attempts(&self) -> u32 {
        self.retries_on_failure.max(1)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.wait_seconds_before_retry)
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.host.trim_end_matches('/'), endpoint)
    }

    /// The key is only sent when the server requires one.
    pub fn effective_api_key(&self) -> Option<&str> {
        (self.needs_key && !self.api_key.is_empty()).then_some(self.api_key.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub batch_size: usize,
    pub max_parallel_requests: usize,
    pub cache_capacity: usize,
    pub cache_ttl_minutes: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_parallel_requests: 1,
            cache_capacity: 2048,
            cache_ttl_minutes: 24 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub frontend_dir: String,
    pub backend_dir: String,
    pub snapshot_dir: String,
    pub history_db: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("locales"),
            frontend_dir: "LocalesClient".into(),
            backend_dir: "Locales".into(),
            snapshot_dir: "snapshots".into(),
            history_db: PathBuf::from("worker_history.db"),
        }
    }
}

impl Settings {
    /// Load from `LOCALE_SYNC_CONFIG` (or `locale-sync.toml`), falling back to
    /// defaults when the file does not exist, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let path = Path::new(&path);
        let mut settings = if path.exists() {
            let settings = Self::load_from_file(path)?;
            info!(path = %path.display(), "settings loaded");
            settings
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("LOCALE_SYNC_API_KEY") {
            self.translator.api_key = key;
            self.translator.needs_key = true;
        }
        if let Ok(host) = std::env::var("LOCALE_SYNC_TRANSLATOR_HOST") {
            self.translator.host = host;
        }
        if let Ok(minutes) = std::env::var("LOCALE_SYNC_MINUTES") {
            match minutes.parse() {
                Ok(m) => self.localization.minutes_between_cycles = m,
                Err(_) => warn!(value = %minutes, "ignoring invalid LOCALE_SYNC_MINUTES"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_language_code(&self.localization.default_language) {
            return Err(ConfigError::Invalid(format!(
                "default_language must be a 2-letter code, got {:?}",
                self.localization.default_language
            )));
        }
        if self.translator.host.trim().is_empty() {
            return Err(ConfigError::Invalid("translator host is empty".into()));
        }
        if self.translator.needs_key && self.translator.api_key.is_empty() {
            return Err(ConfigError::Invalid("translator needs_key is set but api_key is empty".into()));
        }
        if self.queue.batch_size == 0 || self.queue.max_parallel_requests == 0 {
            return Err(ConfigError::Invalid(
                "queue batch_size and max_parallel_requests must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Two ASCII letters, e.g. "en".
pub fn is_language_code(code: &str) -> bool {
    code.len() == 2 && code.bytes().all(|b| b.is_ascii_alphabetic())
}
