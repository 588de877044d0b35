//! Machine translation: client trait, LibreTranslate implementation, HTTP
//! transport seam and an in-memory translation cache.

pub mod cache;
pub mod libre;
pub mod transport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use libre::LibreTranslateClient;
pub use transport::{ApiReply, ApiRequest, ReqwestTransport, Transport, TransportError};

/// Successful text translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    /// Network attempts spent, including the lower-cased retry. 0 on the fast path.
    pub attempts: u32,
    pub lowercased_retry: bool,
}

/// A language advertised by the translation server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiLanguage {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

/// One candidate returned by language detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub language: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedFile {
    pub translated_file_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    /// Bad request shape; never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Server kept answering 500/502 (or the connection kept failing).
    #[error("gave up after {attempts} attempts: {last}")]
    Transient { attempts: u32, last: String },
    /// Non-retryable HTTP status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("language pair {from_lang}->{to_lang} not supported")]
    UnsupportedPair { from_lang: String, to_lang: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("server returned an empty translation")]
    EmptyTranslation,
    #[error("transport error: {0}")]
    Transport(String),
}

impl TranslateError {
    /// Whether the whole language should be abandoned.
    pub fn aborts_language(&self) -> bool {
        matches!(self, TranslateError::UnsupportedPair { .. })
    }
}

/// Failed phrase translation. `fallback_text` is the original text so that
/// dictionary writes never contain empty values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct TranslateFailure {
    pub error: TranslateError,
    pub fallback_text: String,
}

impl TranslateFailure {
    pub fn new(error: TranslateError, original_text: &str) -> Self {
        Self {
            error,
            fallback_text: original_text.to_string(),
        }
    }
}

/// Translation backend used by the queue processor and the cycle.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` from an explicit `source` (never "auto") into `target`.
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<Translation, TranslateFailure>;

    /// Translate with server-side source detection.
    async fn translate_auto(&self, text: &str, target: &str)
        -> Result<Translation, TranslateFailure>;

    async fn detect_language(&self, text: &str) -> Result<Vec<Detection>, TranslateError>;

    async fn available_languages(&self) -> Result<Vec<ApiLanguage>, TranslateError>;

    async fn translate_file(
        &self,
        content: Vec<u8>,
        file_name: &str,
        source: &str,
        target: &str,
    ) -> Result<TranslatedFile, TranslateError>;
}
