//! Apache Tika extraction client.
//!
//! Streams object content to a Tika server with `PUT {url}/tika` and
//! `Accept: text/plain`, and reads the extracted text back. The request
//! body is the blob store stream itself, so objects are never buffered
//! whole in this process.
//!
//! | Tika response | Result |
//! |---------------|--------|
//! | 2xx | extracted text (may be empty) |
//! | 415, 422 | [`ExtractionError::Unsupported`] |
//! | other non-2xx | [`ExtractionError::Rejected`] |
//! | connect failure | [`ExtractionError::Unreachable`] |
//! | client deadline | [`ExtractionError::Timeout`] |

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_DISPOSITION};
use reqwest::StatusCode;
use std::time::Duration;

use crate::config::ExtractionConfig;
use crate::extract::{ExtractionError, Extractor, TextStream};
use crate::storage::ByteStream;

pub struct TikaExtractor {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl TikaExtractor {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ExtractionError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/tika", url.trim_end_matches('/')),
            timeout,
        })
    }

    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        Self::new(&config.url, Duration::from_secs(config.timeout_secs))
    }

    fn classify(&self, err: reqwest::Error) -> ExtractionError {
        if err.is_timeout() {
            ExtractionError::Timeout(self.timeout)
        } else {
            ExtractionError::Unreachable(format!("{}: {}", self.endpoint, err))
        }
    }

    async fn send(&self, key: &str, content: ByteStream) -> Result<reqwest::Response, ExtractionError> {
        let mut request = self
            .client
            .put(&self.endpoint)
            .header(ACCEPT, "text/plain")
            .timeout(self.timeout)
            .body(reqwest::Body::wrap_stream(content));

        // Filename hint for Tika's type detection; skipped when the key is
        // not a valid header value.
        let file_name = key.rsplit('/').next().unwrap_or(key);
        if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
            request = request.header(CONTENT_DISPOSITION, value);
        }

        let resp = request.send().await.map_err(|e| self.classify(e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message: String = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(500)
            .collect();
        match status {
            StatusCode::UNSUPPORTED_MEDIA_TYPE | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(ExtractionError::Unsupported(format!("{}: {}", key, message)))
            }
            _ => Err(ExtractionError::Rejected {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

#[async_trait]
impl Extractor for TikaExtractor {
    async fn extract(&self, key: &str, content: ByteStream) -> Result<String, ExtractionError> {
        let resp = self.send(key, content).await?;
        resp.text().await.map_err(|e| self.classify(e))
    }

    async fn extract_streaming(
        &self,
        key: &str,
        content: ByteStream,
    ) -> Result<TextStream, ExtractionError> {
        let resp = self.send(key, content).await?;
        let timeout = self.timeout;
        Ok(resp
            .bytes_stream()
            .map_err(move |e| {
                if e.is_timeout() {
                    ExtractionError::Timeout(timeout)
                } else {
                    ExtractionError::Unreachable(e.to_string())
                }
            })
            .boxed())
    }
}
