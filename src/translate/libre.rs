//! LibreTranslate-compatible API client.
//! Form-encoded requests, fixed-delay retry on 500/502 and connection
//! failures, and a one-shot lower-case retry for echoed capitalized phrases.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::transport::{ApiReply, ApiRequest, ReqwestTransport, Transport};
use super::{
    ApiLanguage, Detection, TranslateError, TranslateFailure, TranslatedFile, Translation,
    Translator,
};
use crate::config::{is_language_code, TranslatorConfig};

const AUTO_SOURCE: &str = "auto";

/// Client for `/translate`, `/detect`, `/languages` and `/translate_file`.
pub struct LibreTranslateClient<T: Transport = ReqwestTransport> {
    transport: T,
    config: TranslatorConfig,
}

impl LibreTranslateClient<ReqwestTransport> {
    /// Build a client with a pooled HTTP transport.
    pub fn from_config(config: TranslatorConfig) -> Result<Self, TranslateError> {
        let timeout = std::time::Duration::from_secs(config.request_timeout_seconds.max(1));
        let transport =
            ReqwestTransport::new(timeout).map_err(|e| TranslateError::Transport(e.to_string()))?;
        Ok(Self { transport, config })
    }
}

/// Reply that made it through the retry loop.
struct Sent {
    reply: ApiReply,
    attempts: u32,
}

impl<T: Transport> LibreTranslateClient<T> {
    pub fn with_transport(transport: T, config: TranslatorConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Send with retry.
    /// 500/502 and connection failures: fixed delay, at most `max_attempts` sends.
    /// Any other non-2xx status: fail immediately.
    async fn send_with_retry(&self, request: &ApiRequest) -> Result<Sent, TranslateError> {
        let max_attempts = self.config.max_attempts();
        let delay = self.config.retry_delay();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let last_error = match self.transport.send(request).await {
                Ok(reply) if reply.is_success() => {
                    return Ok(Sent {
                        reply,
                        attempts: attempt,
                    });
                }
                Ok(reply) if matches!(reply.status, 500 | 502) => {
                    format!("server error: {}", reply.status)
                }
                Ok(reply) => return Err(status_error(request, &reply)),
                Err(e) if e.is_transient() => e.to_string(),
                Err(e) => return Err(TranslateError::Transport(e.to_string())),
            };

            if attempt >= max_attempts {
                warn!(
                    url = request.url(),
                    attempts = attempt,
                    error = %last_error,
                    "retries exhausted"
                );
                return Err(TranslateError::Transient {
                    attempts: attempt,
                    last: last_error,
                });
            }
            warn!(
                url = request.url(),
                attempt,
                wait_ms = delay.as_millis() as u64,
                error = %last_error,
                "transient error, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn with_key(&self, mut fields: Vec<(String, String)>) -> Vec<(String, String)> {
        if let Some(key) = self.config.effective_api_key() {
            fields.push(("api_key".into(), key.to_string()));
        }
        fields
    }

    fn translate_request(&self, text: &str, source: &str, target: &str) -> ApiRequest {
        ApiRequest::Form {
            url: self.config.url(&self.config.translate_endpoint),
            fields: self.with_key(vec![
                ("q".into(), text.to_string()),
                ("source".into(), source.to_string()),
                ("target".into(), target.to_string()),
                ("format".into(), "text".into()),
            ]),
        }
    }

    async fn translate_text(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<Translation, TranslateFailure> {
        let fail = |error| TranslateFailure::new(error, text);

        if !is_language_code(target) {
            return Err(fail(TranslateError::InvalidInput(format!(
                "invalid target language {target:?}"
            ))));
        }
        if text.is_empty() {
            return Err(fail(TranslateError::InvalidInput("text cannot be empty".into())));
        }
        if source != AUTO_SOURCE && !is_language_code(source) {
            return Err(fail(TranslateError::InvalidInput(format!(
                "invalid source language {source:?}"
            ))));
        }
        if source.eq_ignore_ascii_case(target) {
            return Ok(Translation {
                text: text.to_string(),
                attempts: 0,
                lowercased_retry: false,
            });
        }

        let mut query = text.to_string();
        let mut lowercased_retry = false;
        let mut attempts = 0;

        loop {
            let request = self.translate_request(&query, source, target);
            let sent = self.send_with_retry(&request).await.map_err(fail)?;
            attempts += sent.attempts;

            let parsed: TranslateResponse = serde_json::from_str(&sent.reply.body)
                .map_err(|e| fail(TranslateError::Decode(e.to_string())))?;
            let translated = parsed.translated_text;
            let echoed = translated.trim().is_empty() || translated == query;

            if !echoed {
                let text = if lowercased_retry {
                    match_leading_case(&translated, text)
                } else {
                    translated
                };
                return Ok(Translation {
                    text,
                    attempts,
                    lowercased_retry,
                });
            }

            // The server echoes some capitalized words; one lower-cased retry only.
            if lowercased_retry || query == query.to_lowercase() {
                if translated.trim().is_empty() {
                    return Err(fail(TranslateError::EmptyTranslation));
                }
                debug!(target_lang = target, "translation echoed source text");
                return Ok(Translation {
                    text: text.to_string(),
                    attempts,
                    lowercased_retry,
                });
            }
            debug!(target_lang = target, "echoed capitalized phrase, retrying lower-cased");
            query = query.to_lowercase();
            lowercased_retry = true;
        }
    }
}

#[async_trait]
impl<T: Transport> Translator for LibreTranslateClient<T> {
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> Result<Translation, TranslateFailure> {
        if source.eq_ignore_ascii_case(AUTO_SOURCE) {
            return Err(TranslateFailure::new(
                TranslateError::InvalidInput("source must not be \"auto\", use translate_auto".into()),
                text,
            ));
        }
        self.translate_text(text, source, target).await
    }

    async fn translate_auto(
        &self,
        text: &str,
        target: &str,
    ) -> Result<Translation, TranslateFailure> {
        self.translate_text(text, AUTO_SOURCE, target).await
    }

    async fn detect_language(&self, text: &str) -> Result<Vec<Detection>, TranslateError> {
        if text.is_empty() {
            return Err(TranslateError::InvalidInput("text cannot be empty".into()));
        }
        let request = ApiRequest::Form {
            url: self.config.url(&self.config.detect_language_endpoint),
            fields: self.with_key(vec![("q".into(), text.to_string())]),
        };
        let sent = self.send_with_retry(&request).await?;
        serde_json::from_str(&sent.reply.body).map_err(|e| TranslateError::Decode(e.to_string()))
    }

    async fn available_languages(&self) -> Result<Vec<ApiLanguage>, TranslateError> {
        let request = ApiRequest::Get {
            url: self.config.url(&self.config.languages_endpoint),
        };
        let sent = self.send_with_retry(&request).await?;
        let languages: Vec<ApiLanguage> = serde_json::from_str(&sent.reply.body)
            .map_err(|e| TranslateError::Decode(e.to_string()))?;
        if languages.is_empty() {
            warn!("translation server reports no supported languages");
        }
        Ok(languages)
    }

    async fn translate_file(
        &self,
        content: Vec<u8>,
        file_name: &str,
        source: &str,
        target: &str,
    ) -> Result<TranslatedFile, TranslateError> {
        if !is_language_code(target) {
            return Err(TranslateError::InvalidInput(format!(
                "invalid target language {target:?}"
            )));
        }
        if source != AUTO_SOURCE && !is_language_code(source) {
            return Err(TranslateError::InvalidInput(format!(
                "invalid source language {source:?}"
            )));
        }
        if content.is_empty() {
            return Err(TranslateError::InvalidInput("file is empty".into()));
        }
        let request = ApiRequest::Multipart {
            url: self.config.url(&self.config.translate_file_endpoint),
            fields: self.with_key(vec![
                ("source".into(), source.to_string()),
                ("target".into(), target.to_string()),
            ]),
            file_name: file_name.to_string(),
            content,
        };
        let sent = self.send_with_retry(&request).await?;
        serde_json::from_str(&sent.reply.body).map_err(|e| TranslateError::Decode(e.to_string()))
    }
}

// --- Response types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    #[serde(default)]
    translated_text: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Map a non-retryable status to an error, spotting unsupported language pairs.
fn status_error(request: &ApiRequest, reply: &ApiReply) -> TranslateError {
    let message = serde_json::from_str::<ErrorBody>(&reply.body)
        .map(|b| b.error)
        .unwrap_or_else(|_| reply.body.chars().take(200).collect());

    if reply.status == 400 && message.to_lowercase().contains("not supported") {
        return TranslateError::UnsupportedPair {
            from_lang: request.field("source").unwrap_or_default().to_string(),
            to_lang: request.field("target").unwrap_or_default().to_string(),
        };
    }
    TranslateError::Status {
        status: reply.status,
        message,
    }
}

/// Re-apply the original's leading capital after a lower-cased retry.
fn match_leading_case(translated: &str, original: &str) -> String {
    let original_upper = original.chars().next().is_some_and(char::is_uppercase);
    let mut chars = translated.chars();
    match chars.next() {
        Some(first) if original_upper => first.to_uppercase().chain(chars).collect(),
        _ => translated.to_string(),
    }
}
