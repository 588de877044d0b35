//! HTTP seam under the translation client.
//! Production uses a pooled reqwest client; tests script replies.

use std::time::Duration;

use async_trait::async_trait;

/// A request to the translation server, independent of the HTTP library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    Get {
        url: String,
    },
    Form {
        url: String,
        fields: Vec<(String, String)>,
    },
    Multipart {
        url: String,
        fields: Vec<(String, String)>,
        file_name: String,
        content: Vec<u8>,
    },
}

impl ApiRequest {
    pub fn url(&self) -> &str {
        match self {
            ApiRequest::Get { url }
            | ApiRequest::Form { url, .. }
            | ApiRequest::Multipart { url, .. } => url,
        }
    }

    /// Value of a form field, if this request carries one.
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            ApiRequest::Get { .. } => None,
            ApiRequest::Form { fields, .. } | ApiRequest::Multipart { fields, .. } => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
        }
    }
}

/// Raw server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiReply {
    pub status: u16,
    pub body: String,
}

impl ApiReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Timeouts and refused/reset connections are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Connect(_))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiReply, TransportError>;
}

/// Pooled reqwest client.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiReply, TransportError> {
        let builder = match request {
            ApiRequest::Get { url } => self.http.get(url),
            ApiRequest::Form { url, fields } => self.http.post(url).form(fields),
            ApiRequest::Multipart {
                url,
                fields,
                file_name,
                content,
            } => {
                let part = reqwest::multipart::Part::bytes(content.clone())
                    .file_name(file_name.clone())
                    .mime_str("application/octet-stream")
                    .map_err(map_reqwest_error)?;
                let form = fields
                    .iter()
                    .fold(reqwest::multipart::Form::new(), |form, (k, v)| {
                        form.text(k.clone(), v.clone())
                    })
                    .part("file", part);
                self.http.post(url).multipart(form)
            }
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(ApiReply { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
