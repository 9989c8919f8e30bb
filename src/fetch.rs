//! Document fetching from a source URL.

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Retrieves raw document bytes for a URL.
///
/// The orchestrator only depends on this trait; the HTTP implementation lives
/// at the edge and tests substitute an in-memory one.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP fetcher with status, content-type, and size checks.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::FetchFailed {
                url: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }

    fn fail(url: &str, message: impl Into<String>) -> Error {
        Error::FetchFailed {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::info!(url, "downloading document");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::fail(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::fail(url, format!("HTTP status {status}")));
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let lowered = content_type.to_lowercase();
            if !lowered.contains("pdf") && !lowered.contains("octet-stream") {
                return Err(Self::fail(
                    url,
                    format!("unexpected content type: {content_type}"),
                ));
            }
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_bytes {
                return Err(Self::fail(
                    url,
                    format!("document is {length} bytes, limit is {}", self.max_bytes),
                ));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::fail(url, e.to_string()))?;

        if bytes.len() > self.max_bytes {
            return Err(Self::fail(
                url,
                format!("document is {} bytes, limit is {}", bytes.len(), self.max_bytes),
            ));
        }

        tracing::info!(url, bytes = bytes.len(), "document downloaded");
        Ok(bytes.to_vec())
    }
}
