//! Ingestion pipeline.
//!
//! Turns storage notifications into indexed documents. For each `Created`
//! event:
//!
//! 1. **Fetch**: open the object's content stream from the blob store.
//! 2. **Extract**: hand the stream to the [`Extractor`].
//! 3. **Save**: upsert an [`IndexedDocument`] keyed by the event's version id.
//! 4. **Retire** (optional): delete other versions stored under the same key.
//!
//! Every stage runs under its own deadline. A failure at any stage is logged
//! and the event is dropped; the pipeline keeps going. There are no retries.
//!
//! # Concurrency
//!
//! [`Pipeline::run`] feeds events through a bounded queue to a fixed pool of
//! workers. A full queue stops the dispatcher from pulling more events,
//! which pushes back on the watcher. Events are independent and may finish
//! in any order; upserts keyed by version id make duplicate deliveries
//! harmless.
//!
//! # Shutdown
//!
//! When the [`CancellationToken`] fires, no further events are admitted.
//! Queued and in-flight events get `shutdown_grace` to finish; after that the
//! workers are aborted and the remainder is reported as abandoned.

use anyhow::Result;
use chrono::{SubsecRound, Utc};
use futures::{Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use searchr_core::{IndexError, IndexManager, IndexedDocument, NotificationEvent, OperationType};

use crate::config::{Config, PipelineConfig, VersionPolicy};
use crate::extract::{self, ExtractionError, Extractor};
use crate::migrate;
use crate::storage::{self, build_globset, BlobStore, StorageError};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    pub queue_depth: usize,
    pub fetch_timeout: Duration,
    pub extract_timeout: Duration,
    pub save_timeout: Duration,
    pub shutdown_grace: Duration,
    pub version_policy: VersionPolicy,
}

impl From<&PipelineConfig> for PipelineOptions {
    fn from(c: &PipelineConfig) -> Self {
        Self {
            workers: c.workers,
            queue_depth: c.queue_depth,
            fetch_timeout: Duration::from_secs(c.fetch_timeout_secs),
            extract_timeout: Duration::from_secs(c.extract_timeout_secs),
            save_timeout: Duration::from_secs(c.save_timeout_secs),
            shutdown_grace: Duration::from_secs(c.shutdown_grace_secs),
            version_policy: c.version_policy,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Extract,
    Save,
    Retire,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Save => "save",
            Stage::Retire => "retire",
        };
        f.write_str(s)
    }
}

/// Why a single event was dropped.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] StorageError),

    #[error("extraction failed: {0}")]
    Extract(#[source] ExtractionError),

    #[error("{stage} failed: {source}")]
    Index {
        stage: Stage,
        #[source]
        source: IndexError,
    },

    #[error("{stage} stage timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Fetch(_) => Stage::Fetch,
            PipelineError::Extract(_) => Stage::Extract,
            PipelineError::Index { stage, .. } | PipelineError::Timeout { stage, .. } => *stage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Indexed,
    /// The event does not describe new content (e.g. a removal).
    Skipped,
}

/// Counts returned by [`Pipeline::run`].
///
/// `received = indexed + skipped + failed + abandoned`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub received: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Events admitted but not finished before shutdown.
    pub abandoned: u64,
}

#[derive(Default)]
struct Counters {
    indexed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

pub struct Pipeline {
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn Extractor>,
    index: Arc<IndexManager>,
    opts: PipelineOptions,
}

async fn deadline<T, F>(stage: Stage, after: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| PipelineError::Timeout { stage, after })?
}

impl Pipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn Extractor>,
        index: Arc<IndexManager>,
        opts: PipelineOptions,
    ) -> Self {
        Self {
            blobs,
            extractor,
            index,
            opts,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.opts
    }

    /// Process one event end to end.
    pub async fn process(&self, event: &NotificationEvent) -> Result<Outcome, PipelineError> {
        if event.operation != OperationType::Created {
            debug!("Skipping {:?} event for {}", event.operation, event.key);
            return Ok(Outcome::Skipped);
        }
        if event.id.is_empty() {
            warn!("Skipping event for {} without a version id", event.key);
            return Ok(Outcome::Skipped);
        }

        let content = deadline(Stage::Fetch, self.opts.fetch_timeout, async {
            self.blobs.get(&event.key).await.map_err(PipelineError::Fetch)
        })
        .await?;

        let body = deadline(Stage::Extract, self.opts.extract_timeout, async {
            self.extractor
                .extract(&event.key, content)
                .await
                .map_err(PipelineError::Extract)
        })
        .await?;

        let doc = IndexedDocument {
            id: event.id.clone(),
            key: event.key.clone(),
            locator: self.blobs.locator(&event.key),
            body,
            size: event.size,
            created_at: Utc::now().trunc_subsecs(0),
        };

        deadline(Stage::Save, self.opts.save_timeout, async {
            self.index
                .save(&doc)
                .await
                .map_err(|source| PipelineError::Index {
                    stage: Stage::Save,
                    source,
                })
        })
        .await?;

        if self.opts.version_policy == VersionPolicy::RetireSuperseded {
            let retired = deadline(Stage::Retire, self.opts.save_timeout, async {
                self.index
                    .retire_superseded(&doc.key, &doc.id)
                    .await
                    .map_err(|source| PipelineError::Index {
                        stage: Stage::Retire,
                        source,
                    })
            })
            .await?;
            if retired > 0 {
                debug!("Retired {} superseded version(s) of {}", retired, doc.key);
            }
        }

        info!("Indexed {} ({} bytes, id {})", doc.key, doc.size, doc.id);
        Ok(Outcome::Indexed)
    }

    /// Consume `events` with a bounded worker pool until the stream ends or
    /// `cancel` fires.
    pub async fn run<S>(self: Arc<Self>, events: S, cancel: CancellationToken) -> PipelineReport
    where
        S: Stream<Item = NotificationEvent> + Send,
    {
        let workers = self.opts.workers.max(1);
        let (tx, rx) = mpsc::channel::<NotificationEvent>(self.opts.queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let pipeline = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            let counters = Arc::clone(&counters);
            pool.spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(event) = next else { break };
                    match pipeline.process(&event).await {
                        Ok(Outcome::Indexed) => counters.indexed.fetch_add(1, Ordering::Relaxed),
                        Ok(Outcome::Skipped) => counters.skipped.fetch_add(1, Ordering::Relaxed),
                        Err(e) => {
                            warn!(
                                key = %event.key,
                                id = %event.id,
                                stage = %e.stage(),
                                "Dropping event: {}",
                                e
                            );
                            counters.failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
                debug!("Worker {} finished", worker);
            });
        }
        info!("Pipeline started with {} workers", workers);

        let mut received = 0u64;
        let mut events = std::pin::pin!(events);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                ev = events.next() => ev,
            };
            let Some(event) = next else { break };
            received += 1;
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = tx.send(event) => r,
            };
            if sent.is_err() {
                break;
            }
        }
        drop(tx);

        let grace = self.opts.shutdown_grace;
        let finished = drain(&mut pool);
        let aborted = tokio::select! {
            _ = finished => false,
            _ = async {
                cancel.cancelled().await;
                tokio::time::sleep(grace).await;
            } => true,
        };
        if aborted {
            warn!("Shutdown grace of {:?} elapsed, aborting in-flight events", grace);
            pool.abort_all();
            while pool.join_next().await.is_some() {}
        }

        let indexed = counters.indexed.load(Ordering::Relaxed);
        let skipped = counters.skipped.load(Ordering::Relaxed);
        let failed = counters.failed.load(Ordering::Relaxed);
        let report = PipelineReport {
            received,
            indexed,
            skipped,
            failed,
            abandoned: received.saturating_sub(indexed + skipped + failed),
        };
        info!(
            "Pipeline stopped: {} received, {} indexed, {} skipped, {} failed, {} abandoned",
            report.received, report.indexed, report.skipped, report.failed, report.abandoned
        );
        report
    }

    /// Backfill: list the bucket and run a synthetic `Created` event for
    /// every object matching `include_globs`.
    pub async fn sync(
        self: Arc<Self>,
        include_globs: &[String],
        cancel: CancellationToken,
    ) -> Result<PipelineReport> {
        let include = build_globset(include_globs)?;
        let objects = self.blobs.list().await?;
        let events: Vec<NotificationEvent> = objects
            .into_iter()
            .filter(|o| include.is_match(&o.key))
            .map(|o| NotificationEvent::created(o.key, o.etag, o.size))
            .collect();
        info!("Backfilling {} object(s)", events.len());
        Ok(self.run(futures::stream::iter(events), cancel).await)
    }
}

/// `searchr sync`: one-shot backfill of the configured bucket.
///
/// Ctrl-C stops admitting objects; in-flight ones get the configured
/// grace period.
pub async fn run_sync(config: &Config) -> Result<()> {
    let index = migrate::init_index(config).await?;
    let blobs = storage::open(&config.storage)?;
    let extractor = extract::open(&config.extraction)?;
    let pipeline = Arc::new(Pipeline::new(
        blobs,
        extractor,
        index,
        PipelineOptions::from(&config.pipeline),
    ));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight objects");
            on_signal.cancel();
        }
    });

    let report = pipeline
        .sync(&config.storage.include_globs, cancel)
        .await?;

    println!("sync {}", config.storage.bucket);
    println!("  received: {}", report.received);
    println!("  indexed: {}", report.indexed);
    println!("  skipped: {}", report.skipped);
    println!("  failed: {}", report.failed);
    if report.abandoned > 0 {
        println!("  abandoned: {}", report.abandoned);
    }
    println!("ok");

    if report.failed > 0 || report.abandoned > 0 {
        anyhow::bail!(
            "{} object(s) failed, {} abandoned",
            report.failed,
            report.abandoned
        );
    }
    Ok(())
}

async fn drain(pool: &mut JoinSet<()>) {
    while let Some(res) = pool.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                error!("Pipeline worker panicked: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::BuiltinExtractor;
    use crate::storage::memory::InMemoryBlobStore;
    use crate::storage::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use searchr_core::store::memory::InMemoryIndexStore;
    use searchr_core::{IndexSchema, SearchQuery};

    async fn index() -> Arc<IndexManager> {
        let schema = IndexSchema::documents("searchr").unwrap();
        let manager = IndexManager::new(Arc::new(InMemoryIndexStore::new()), schema);
        manager.create().await.unwrap();
        Arc::new(manager)
    }

    fn pipeline(
        blobs: Arc<InMemoryBlobStore>,
        extractor: Arc<dyn Extractor>,
        index: Arc<IndexManager>,
        opts: PipelineOptions,
    ) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(blobs, extractor, index, opts))
    }

    /// Extractor that waits before delegating, for shutdown tests.
    struct SlowExtractor(Duration);

    #[async_trait]
    impl Extractor for SlowExtractor {
        async fn extract(&self, key: &str, content: ByteStream) -> Result<String, ExtractionError> {
            tokio::time::sleep(self.0).await;
            BuiltinExtractor.extract(key, content).await
        }
    }

    #[tokio::test]
    async fn process_indexes_created_event() {
        let blobs = Arc::new(InMemoryBlobStore::new("docs"));
        let id = blobs
            .put("a.txt", Bytes::from_static(b"quarterly revenue"), "text/plain")
            .await
            .unwrap();
        let index = index().await;
        let p = pipeline(
            blobs,
            Arc::new(BuiltinExtractor),
            index.clone(),
            PipelineOptions::default(),
        );

        let outcome = p
            .process(&NotificationEvent::created("a.txt", id.clone(), 17))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Indexed);

        let doc = index.get(&id).await.unwrap().unwrap();
        assert_eq!(doc.key, "a.txt");
        assert_eq!(doc.locator, "memory://docs/a.txt");
        assert_eq!(doc.body, "quarterly revenue");
        assert_eq!(doc.size, 17);
    }

    #[tokio::test]
    async fn removed_events_are_skipped() {
        let p = pipeline(
            Arc::new(InMemoryBlobStore::new("docs")),
            Arc::new(BuiltinExtractor),
            index().await,
            PipelineOptions::default(),
        );
        let ev = NotificationEvent {
            operation: OperationType::Removed,
            key: "gone.txt".into(),
            id: "v1".into(),
            size: 0,
        };
        assert_eq!(p.process(&ev).await.unwrap(), Outcome::Skipped);
    }

    #[tokio::test]
    async fn missing_object_fails_at_fetch() {
        let p = pipeline(
            Arc::new(InMemoryBlobStore::new("docs")),
            Arc::new(BuiltinExtractor),
            index().await,
            PipelineOptions::default(),
        );
        let err = p
            .process(&NotificationEvent::created("nope.txt", "v1", 1))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Fetch);
    }

    #[tokio::test]
    async fn extraction_deadline_is_enforced() {
        let blobs = Arc::new(InMemoryBlobStore::new("docs"));
        let id = blobs
            .put("slow.txt", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        let opts = PipelineOptions {
            extract_timeout: Duration::from_millis(50),
            ..PipelineOptions::default()
        };
        let p = pipeline(
            blobs,
            Arc::new(SlowExtractor(Duration::from_secs(5))),
            index().await,
            opts,
        );
        let err = p
            .process(&NotificationEvent::created("slow.txt", id, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Timeout {
                stage: Stage::Extract,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn duplicate_events_leave_one_document() {
        let blobs = Arc::new(InMemoryBlobStore::new("docs"));
        let id = blobs
            .put("dup.txt", Bytes::from_static(b"same content"), "text/plain")
            .await
            .unwrap();
        let index = index().await;
        let p = pipeline(
            blobs,
            Arc::new(BuiltinExtractor),
            index.clone(),
            PipelineOptions::default(),
        );

        let ev = NotificationEvent::created("dup.txt", id, 12);
        let events = futures::stream::iter(vec![ev.clone(), ev.clone(), ev]);
        let report = p.run(events, CancellationToken::new()).await;
        assert_eq!(report.received, 3);
        assert_eq!(report.indexed, 3);

        let page = index.find(&SearchQuery::new("content")).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_others() {
        let blobs = Arc::new(InMemoryBlobStore::new("docs"));
        let good = blobs
            .put("good.txt", Bytes::from_static(b"fine"), "text/plain")
            .await
            .unwrap();
        let bad = blobs
            .put("bad.bin", Bytes::from_static(b"\x00\x01"), "application/octet-stream")
            .await
            .unwrap();
        let index = index().await;
        let p = pipeline(
            blobs,
            Arc::new(BuiltinExtractor),
            index.clone(),
            PipelineOptions::default(),
        );

        let events = futures::stream::iter(vec![
            NotificationEvent::created("bad.bin", bad, 2),
            NotificationEvent::created("missing.txt", "v0", 1),
            NotificationEvent::created("good.txt", good.clone(), 4),
        ]);
        let report = p.run(events, CancellationToken::new()).await;
        assert_eq!(report.failed, 2);
        assert_eq!(report.indexed, 1);
        assert_eq!(report.abandoned, 0);
        assert!(index.get(&good).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancel_aborts_after_grace() {
        let blobs = Arc::new(InMemoryBlobStore::new("docs"));
        let id = blobs
            .put("slow.txt", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        let opts = PipelineOptions {
            workers: 1,
            shutdown_grace: Duration::from_millis(100),
            ..PipelineOptions::default()
        };
        let p = pipeline(
            blobs,
            Arc::new(SlowExtractor(Duration::from_secs(30))),
            index().await,
            opts,
        );

        // An open-ended stream: one event, then nothing until cancelled.
        let events = futures::stream::iter(vec![NotificationEvent::created("slow.txt", id, 1)])
            .chain(futures::stream::pending());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let report = p.run(events, cancel).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.received, 1);
        assert_eq!(report.indexed, 0);
        assert_eq!(report.abandoned, 1);
    }

    #[tokio::test]
    async fn in_flight_work_finishes_within_grace() {
        let blobs = Arc::new(InMemoryBlobStore::new("docs"));
        let id = blobs
            .put("quick.txt", Bytes::from_static(b"done soon"), "text/plain")
            .await
            .unwrap();
        let opts = PipelineOptions {
            shutdown_grace: Duration::from_secs(5),
            ..PipelineOptions::default()
        };
        let index = index().await;
        let p = pipeline(
            blobs,
            Arc::new(SlowExtractor(Duration::from_millis(200))),
            index.clone(),
            opts,
        );

        let events = futures::stream::iter(vec![NotificationEvent::created("quick.txt", id.clone(), 9)])
            .chain(futures::stream::pending());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let report = p.run(events, cancel).await;
        assert_eq!(report.indexed, 1);
        assert_eq!(report.abandoned, 0);
        assert!(index.get(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retire_policy_keeps_only_latest_version() {
        let blobs = Arc::new(InMemoryBlobStore::new("docs"));
        let v1 = blobs
            .put("doc.txt", Bytes::from_static(b"draft text"), "text/plain")
            .await
            .unwrap();
        let index = index().await;
        let opts = PipelineOptions {
            version_policy: VersionPolicy::RetireSuperseded,
            ..PipelineOptions::default()
        };
        let p = pipeline(blobs.clone(), Arc::new(BuiltinExtractor), index.clone(), opts);

        p.process(&NotificationEvent::created("doc.txt", v1.clone(), 10))
            .await
            .unwrap();
        let v2 = blobs
            .put("doc.txt", Bytes::from_static(b"final text"), "text/plain")
            .await
            .unwrap();
        p.process(&NotificationEvent::created("doc.txt", v2.clone(), 10))
            .await
            .unwrap();

        assert!(index.get(&v1).await.unwrap().is_none());
        assert_eq!(index.get(&v2).await.unwrap().unwrap().body, "final text");
    }

    #[tokio::test]
    async fn keep_all_policy_keeps_every_version() {
        let blobs = Arc::new(InMemoryBlobStore::new("docs"));
        let v1 = blobs
            .put("doc.txt", Bytes::from_static(b"draft"), "text/plain")
            .await
            .unwrap();
        let index = index().await;
        let p = pipeline(
            blobs.clone(),
            Arc::new(BuiltinExtractor),
            index.clone(),
            PipelineOptions::default(),
        );
        p.process(&NotificationEvent::created("doc.txt", v1.clone(), 5))
            .await
            .unwrap();
        let v2 = blobs
            .put("doc.txt", Bytes::from_static(b"final"), "text/plain")
            .await
            .unwrap();
        p.process(&NotificationEvent::created("doc.txt", v2.clone(), 5))
            .await
            .unwrap();

        assert!(index.get(&v1).await.unwrap().is_some());
        assert!(index.get(&v2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sync_backfills_matching_objects() {
        let blobs = Arc::new(InMemoryBlobStore::new("docs"));
        blobs
            .put("keep/a.txt", Bytes::from_static(b"alpha"), "text/plain")
            .await
            .unwrap();
        blobs
            .put("skip/b.txt", Bytes::from_static(b"beta"), "text/plain")
            .await
            .unwrap();
        let index = index().await;
        let p = pipeline(
            blobs,
            Arc::new(BuiltinExtractor),
            index.clone(),
            PipelineOptions::default(),
        );

        let report = p
            .sync(&["keep/**".to_string()], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.received, 1);
        assert_eq!(report.indexed, 1);
        assert_eq!(index.find(&SearchQuery::new("alpha")).await.unwrap().total, 1);
        assert!(index.find(&SearchQuery::new("beta")).await.unwrap().is_empty());
    }
}
