//! Configuration parsing and validation.
//!
//! searchr is configured via a TOML file (default `config/searchr.toml`).
//! Every section except `[storage]` has usable defaults.
//!
//! # Example
//!
//! ```toml
//! [index]
//! db_path = "./data/searchr.sqlite"
//! name = "searchr"
//!
//! [storage]
//! bucket = "searchr"
//! endpoint_url = "http://localhost:9000"   # MinIO
//!
//! [extraction]
//! url = "http://localhost:9998"            # Apache Tika
//!
//! [pipeline]
//! workers = 4
//!
//! [server]
//! bind = "0.0.0.0:2112"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use searchr_core::schema::{IndexSchema, DEFAULT_INDEX_NAME};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_index_name")]
    pub name: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            name: default_index_name(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/searchr.sqlite")
}
fn default_index_name() -> String {
    DEFAULT_INDEX_NAME.to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_events")]
    pub events: Vec<String>,
    #[serde(default = "default_resubscribe_delay_secs")]
    pub resubscribe_delay_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**".to_string()]
}
fn default_events() -> Vec<String> {
    vec!["s3:ObjectCreated:*".to_string()]
}
fn default_resubscribe_delay_secs() -> u64 {
    5
}

impl StorageConfig {
    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_secs(self.resubscribe_delay_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionBackend {
    #[default]
    Tika,
    Builtin,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub backend: ExtractionBackend,
    #[serde(default = "default_tika_url")]
    pub url: String,
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            backend: ExtractionBackend::default(),
            url: default_tika_url(),
            timeout_secs: default_extraction_timeout_secs(),
        }
    }
}

fn default_tika_url() -> String {
    "http://localhost:9998".to_string()
}
fn default_extraction_timeout_secs() -> u64 {
    120
}

/// What to do with older versions of a key once a newer one is indexed.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Leave every indexed version in place.
    #[default]
    KeepAll,
    /// Delete other ids stored under the same key after each save.
    RetireSuperseded,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Number of concurrent ingestion workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Events buffered between the watcher and the workers.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_extraction_timeout_secs")]
    pub extract_timeout_secs: u64,
    #[serde(default = "default_save_timeout_secs")]
    pub save_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default)]
    pub version_policy: VersionPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            extract_timeout_secs: default_extraction_timeout_secs(),
            save_timeout_secs: default_save_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            version_policy: VersionPolicy::default(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_queue_depth() -> usize {
    64
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_save_timeout_secs() -> u64 {
    10
}
fn default_shutdown_grace_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:2112".to_string()
}
fn default_max_upload_bytes() -> usize {
    10 << 20
}

impl Config {
    /// Build the index schema named in `[index]`.
    pub fn schema(&self) -> Result<IndexSchema> {
        Ok(IndexSchema::documents(&self.index.name)?)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config
        .schema()
        .with_context(|| format!("index.name '{}' is not usable", config.index.name))?;

    if config.storage.backend == StorageBackend::S3 && config.storage.bucket.trim().is_empty() {
        bail!("storage.bucket must be set for the s3 backend");
    }
    if config.storage.events.is_empty() {
        bail!("storage.events must list at least one event filter");
    }
    if config.storage.include_globs.is_empty() {
        bail!("storage.include_globs must not be empty");
    }

    let p = &config.pipeline;
    if p.workers == 0 {
        bail!("pipeline.workers must be >= 1");
    }
    if p.queue_depth == 0 {
        bail!("pipeline.queue_depth must be >= 1");
    }
    if p.fetch_timeout_secs == 0 || p.extract_timeout_secs == 0 || p.save_timeout_secs == 0 {
        bail!("pipeline timeouts must be > 0");
    }

    if config.extraction.timeout_secs == 0 {
        bail!("extraction.timeout_secs must be > 0");
    }
    if config.server.max_upload_bytes == 0 {
        bail!("server.max_upload_bytes must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse_config("[storage]\nbucket = \"searchr\"\n").unwrap();
        assert_eq!(cfg.index.name, "searchr");
        assert_eq!(cfg.storage.events, vec!["s3:ObjectCreated:*".to_string()]);
        assert_eq!(cfg.extraction.backend, ExtractionBackend::Tika);
        assert_eq!(cfg.extraction.url, "http://localhost:9998");
        assert_eq!(cfg.pipeline.workers, 4);
        assert_eq!(cfg.pipeline.shutdown_grace_secs, 20);
        assert_eq!(cfg.pipeline.version_policy, VersionPolicy::KeepAll);
        assert_eq!(cfg.server.bind, "0.0.0.0:2112");
        assert_eq!(cfg.server.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn s3_backend_requires_bucket() {
        let err = parse_config("[storage]\nregion = \"eu-west-1\"\n").unwrap_err();
        assert!(err.to_string().contains("storage.bucket"));
    }

    #[test]
    fn memory_backend_needs_no_bucket() {
        let cfg = parse_config("[storage]\nbackend = \"memory\"\n").unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn rejects_zero_workers() {
        let err = parse_config(
            "[storage]\nbucket = \"b\"\n[pipeline]\nworkers = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("pipeline.workers"));
    }

    #[test]
    fn rejects_bad_index_name() {
        let err = parse_config("[index]\nname = \"my index\"\n[storage]\nbucket = \"b\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("index.name"));
    }

    #[test]
    fn parses_version_policy() {
        let cfg = parse_config(
            "[storage]\nbucket = \"b\"\n[pipeline]\nversion_policy = \"retire_superseded\"\n",
        )
        .unwrap();
        assert_eq!(cfg.pipeline.version_policy, VersionPolicy::RetireSuperseded);
    }
}
