//! Amazon S3 and S3-compatible blob store.
//!
//! Talks to the S3 REST API directly with AWS Signature V4 authentication
//! (see [`super::sigv4`]). Buckets on AWS are addressed virtual-host style
//! (`<bucket>.s3.<region>.amazonaws.com`); a custom `endpoint_url` (MinIO,
//! LocalStack) switches to path-style addressing and keeps the endpoint's
//! scheme.
//!
//! Change notifications use MinIO's `ListenBucketNotification` extension:
//! a long-lived `GET /<bucket>?events=...` whose response body is a stream
//! of newline-delimited JSON records. Plain AWS S3 has no equivalent, so
//! [`S3BlobStore::subscribe`] returns [`StorageError::Unsupported`] there.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! bucket = "searchr"
//! region = "us-east-1"
//! endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! Credentials come from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and
//! optionally `AWS_SESSION_TOKEN`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use searchr_core::models::{NotificationEvent, OperationType};

use super::sigv4::{self, AwsCredentials, SigningRequest, EMPTY_PAYLOAD_SHA256};
use super::{BlobStore, ByteStream, EventFilter, EventStream, ObjectInfo, StorageError};
use crate::config::StorageConfig;

/// Timeout for single-shot requests. Notification streams have none.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest notification line accepted before the stream is abandoned.
const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, Clone)]
struct Endpoint {
    scheme: String,
    host: String,
    path_style: bool,
}

impl Endpoint {
    fn resolve(config: &StorageConfig) -> Self {
        match config.endpoint_url {
            Some(ref url) => {
                let (scheme, rest) = match url.split_once("://") {
                    Some((scheme, rest)) => (scheme.to_string(), rest),
                    None => ("https".to_string(), url.as_str()),
                };
                Self {
                    scheme,
                    host: rest.trim_end_matches('/').to_string(),
                    path_style: true,
                }
            }
            None => Self {
                scheme: "https".to_string(),
                host: format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
                path_style: false,
            },
        }
    }
}

/// [`BlobStore`] backed by an S3 bucket.
pub struct S3BlobStore {
    client: reqwest::Client,
    creds: AwsCredentials,
    bucket: String,
    region: String,
    endpoint: Endpoint,
}

impl S3BlobStore {
    /// Build a store for `[storage]`, reading credentials from the
    /// environment.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::with_credentials(config, AwsCredentials::from_env()?)
    }

    pub fn with_credentials(
        config: &StorageConfig,
        creds: AwsCredentials,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            creds,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: Endpoint::resolve(config),
        })
    }

    fn canonical_uri(&self, key: Option<&str>) -> String {
        let encoded = key.map(sigv4::encode_key_path);
        match (self.endpoint.path_style, encoded) {
            (true, Some(k)) => format!("/{}/{}", self.bucket, k),
            (true, None) => format!("/{}", self.bucket),
            (false, Some(k)) => format!("/{}", k),
            (false, None) => "/".to_string(),
        }
    }

    fn request(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(String, String)],
        payload_hash: &str,
    ) -> reqwest::RequestBuilder {
        let canonical_uri = self.canonical_uri(key);
        let signed = sigv4::sign(
            &SigningRequest {
                method: method.as_str(),
                host: &self.endpoint.host,
                canonical_uri: &canonical_uri,
                query,
                payload_hash,
            },
            &self.creds,
            &self.region,
            Utc::now(),
        );

        let mut url = format!(
            "{}://{}{}",
            self.endpoint.scheme, self.endpoint.host, canonical_uri
        );
        if !signed.canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&signed.canonical_querystring);
        }

        let mut builder = self.client.request(method, url);
        for (name, value) in &signed.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        key: &str,
    ) -> Result<Response, StorageError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| StorageError::Transport(format!("s3://{}/{}: {}", self.bucket, key, e)))?;
        check_status(resp, key).await
    }
}

async fn check_status(resp: Response, key: &str) -> Result<Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND && !key.is_empty() {
        return Err(StorageError::NotFound(key.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::Status {
        status: status.as_u16(),
        message: body.chars().take(500).collect(),
    })
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        key: &str,
        content: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let payload_hash = sigv4::hex_sha256(&content);
        let builder = self
            .request(Method::PUT, Some(key), &[], &payload_hash)
            .header("content-type", content_type)
            .timeout(REQUEST_TIMEOUT)
            .body(content);
        let resp = self.send(builder, key).await?;

        resp.headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StorageError::Protocol(format!("PutObject for '{}' returned no ETag", key)))
    }

    async fn get(&self, key: &str) -> Result<ByteStream, StorageError> {
        let builder = self.request(Method::GET, Some(key), &[], EMPTY_PAYLOAD_SHA256);
        let resp = self.send(builder, key).await?;
        Ok(resp
            .bytes_stream()
            .map_err(|e| StorageError::Transport(e.to_string()))
            .boxed())
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let builder = self
                .request(Method::GET, None, &query, EMPTY_PAYLOAD_SHA256)
                .timeout(REQUEST_TIMEOUT);
            let resp = self.send(builder, "").await?;
            let xml = resp
                .text()
                .await
                .map_err(|e| StorageError::Transport(e.to_string()))?;

            let page = parse_list_objects_response(&xml);
            objects.extend(page.objects);

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                (true, None) => {
                    return Err(StorageError::Protocol(
                        "truncated listing without NextContinuationToken".into(),
                    ))
                }
                (false, _) => break,
            }
        }

        tracing::debug!(bucket = %self.bucket, count = objects.len(), "listed objects");
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let builder = self
            .request(Method::DELETE, Some(key), &[], EMPTY_PAYLOAD_SHA256)
            .timeout(REQUEST_TIMEOUT);
        self.send(builder, key).await?;
        Ok(())
    }

    async fn subscribe(&self, filters: &[String]) -> Result<EventStream, StorageError> {
        if !self.endpoint.path_style {
            return Err(StorageError::Unsupported(
                "bucket notification streams require an S3-compatible endpoint (MinIO)".into(),
            ));
        }
        let filter = EventFilter::new(filters)?;

        let mut query: Vec<(String, String)> = filters
            .iter()
            .map(|f| ("events".to_string(), f.clone()))
            .collect();
        query.push(("prefix".to_string(), String::new()));
        query.push(("suffix".to_string(), String::new()));

        let builder = self.request(Method::GET, None, &query, EMPTY_PAYLOAD_SHA256);
        let resp = self.send(builder, "").await?;
        tracing::info!(bucket = %self.bucket, ?filters, "listening for bucket notifications");

        let chunks = resp
            .bytes_stream()
            .map_err(|e| StorageError::Transport(e.to_string()))
            .boxed();

        let events = ndjson_lines(chunks)
            .flat_map(move |line| {
                let batch = match line.and_then(|l| parse_notification_line(&l)) {
                    Ok(records) => records
                        .into_iter()
                        .filter(|(name, _)| filter.matches(name))
                        .map(|(_, event)| Ok(event))
                        .collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(batch)
            })
            .boxed();
        Ok(events)
    }

    fn locator(&self, key: &str) -> String {
        format!("{}{}", self.endpoint_base(), sigv4::encode_key_path(key))
    }
}

impl S3BlobStore {
    fn endpoint_base(&self) -> String {
        if self.endpoint.path_style {
            format!(
                "{}://{}/{}/",
                self.endpoint.scheme, self.endpoint.host, self.bucket
            )
        } else {
            format!("{}://{}/", self.endpoint.scheme, self.endpoint.host)
        }
    }
}

// ============ Notification stream decoding ============

struct LineState {
    chunks: ByteStream,
    buf: Vec<u8>,
    done: bool,
}

/// Split a byte stream into newline-terminated lines. A trailing partial
/// line is yielded when the stream ends. A transport error, or a pending
/// line longer than [`MAX_LINE_BYTES`], ends the stream with an error.
fn ndjson_lines(chunks: ByteStream) -> BoxStream<'static, Result<Vec<u8>, StorageError>> {
    let state = LineState {
        chunks,
        buf: Vec::new(),
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                return Some((Ok(line), st));
            }
            if st.buf.len() > MAX_LINE_BYTES {
                st.done = true;
                st.buf.clear();
                return Some((
                    Err(StorageError::Protocol(format!(
                        "notification line exceeds {} bytes",
                        MAX_LINE_BYTES
                    ))),
                    st,
                ));
            }
            if st.done {
                if st.buf.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut st.buf);
                return Some((Ok(line), st));
            }
            match st.chunks.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(e), st));
                }
                None => st.done = true,
            }
        }
    })
    .boxed()
}

#[derive(Debug, Deserialize)]
struct NotificationInfo {
    #[serde(rename = "Records", default)]
    records: Option<Vec<EventRecord>>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: EventEntity,
}

#[derive(Debug, Deserialize)]
struct EventEntity {
    object: EventObject,
}

#[derive(Debug, Deserialize)]
struct EventObject {
    key: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "eTag", default)]
    etag: String,
}

/// Parse one NDJSON line into `(event name, event)` pairs. Blank keep-alive
/// lines and records-less payloads yield nothing.
fn parse_notification_line(
    line: &[u8],
) -> Result<Vec<(String, NotificationEvent)>, StorageError> {
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    let info: NotificationInfo = serde_json::from_slice(line)
        .map_err(|e| StorageError::Protocol(format!("notification record: {}", e)))?;

    Ok(info
        .records
        .unwrap_or_default()
        .into_iter()
        .map(|r| {
            let event = NotificationEvent {
                operation: OperationType::from_event_name(&r.event_name),
                key: decode_event_key(&r.s3.object.key),
                id: r.s3.object.etag.trim_matches('"').to_string(),
                size: r.s3.object.size,
            };
            (r.event_name, event)
        })
        .collect())
}

/// Object keys in S3 event records are URL-encoded with `+` for spaces.
fn decode_event_key(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ============ ListObjectsV2 parsing ============

struct ListPage {
    objects: Vec<ObjectInfo>,
    is_truncated: bool,
    next_token: Option<String>,
}

fn parse_list_objects_response(xml: &str) -> ListPage {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = extract_xml_value(block, "Key")
            .map(|k| unescape_xml(&k))
            .unwrap_or_default();
        // Folder placeholders.
        if key.is_empty() || key.ends_with('/') {
            continue;
        }

        let last_modified = extract_xml_value(block, "LastModified")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let etag = extract_xml_value(block, "ETag")
            .map(|e| unescape_xml(&e))
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();

        let size = extract_xml_value(block, "Size")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        objects.push(ObjectInfo {
            key,
            etag,
            size,
            last_modified,
        });
    }

    ListPage {
        objects,
        is_truncated,
        next_token,
    }
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
