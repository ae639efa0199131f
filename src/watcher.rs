//! Storage change watcher.
//!
//! Holds a notification subscription open against a [`BlobStore`] and
//! forwards matching events into a bounded channel. When the subscription
//! fails or the server closes it, the watcher waits `resubscribe_delay` and
//! subscribes again, so a MinIO restart does not stop ingestion. Events for
//! keys outside `include_globs` are dropped here, before they reach the
//! pipeline.

use anyhow::Result;
use futures::StreamExt;
use globset::GlobSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use searchr_core::models::NotificationEvent;

use crate::config::StorageConfig;
use crate::storage::{build_globset, BlobStore, StorageError};

pub struct StorageWatcher {
    blobs: Arc<dyn BlobStore>,
    filters: Vec<String>,
    include: GlobSet,
    resubscribe_delay: Duration,
}

impl StorageWatcher {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        filters: Vec<String>,
        include_globs: &[String],
        resubscribe_delay: Duration,
    ) -> Result<Self> {
        Ok(Self {
            blobs,
            filters,
            include: build_globset(include_globs)?,
            resubscribe_delay,
        })
    }

    pub fn from_config(blobs: Arc<dyn BlobStore>, config: &StorageConfig) -> Result<Self> {
        Self::new(
            blobs,
            config.events.clone(),
            &config.include_globs,
            config.resubscribe_delay(),
        )
    }

    /// Start watching. The returned stream yields events until `cancel`
    /// fires or the subscription becomes permanently unavailable.
    pub fn watch(self, cancel: CancellationToken, capacity: usize) -> ReceiverStream<NotificationEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(async move {
            self.run(tx, cancel).await;
        });
        ReceiverStream::new(rx)
    }

    async fn run(self, tx: mpsc::Sender<NotificationEvent>, cancel: CancellationToken) {
        loop {
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.blobs.subscribe(&self.filters) => r,
            };

            match subscribed {
                Ok(mut events) => loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => return,
                        item = events.next() => item,
                    };
                    match item {
                        Some(Ok(event)) => {
                            if !self.include.is_match(&event.key) {
                                debug!("Ignoring event for excluded key {}", event.key);
                                continue;
                            }
                            let sent = tokio::select! {
                                _ = cancel.cancelled() => return,
                                r = tx.send(event) => r,
                            };
                            if sent.is_err() {
                                debug!("Event consumer dropped, stopping watcher");
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Notification stream error: {}", e);
                            break;
                        }
                        None => {
                            info!("Notification stream closed by server");
                            break;
                        }
                    }
                },
                Err(StorageError::Unsupported(msg)) => {
                    error!("Cannot watch storage: {}", msg);
                    return;
                }
                Err(e) => {
                    warn!("Failed to subscribe to notifications: {}", e);
                }
            }

            debug!("Resubscribing in {:?}", self.resubscribe_delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
        }
    }
}
