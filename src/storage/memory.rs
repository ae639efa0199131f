//! Process-local blob store.
//!
//! Objects live in a map guarded by an [`RwLock`]; notifications fan out
//! over a [`broadcast`] channel to every subscriber. Version identifiers are
//! the hex SHA-256 of the content, so identical uploads produce identical
//! ids just as S3 ETags do for single-part uploads.
//!
//! [`InMemoryBlobStore::redeliver`] re-broadcasts an event, which lets tests
//! exercise at-least-once delivery.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use searchr_core::models::{NotificationEvent, OperationType};

use super::sigv4::hex_sha256;
use super::{BlobStore, ByteStream, EventFilter, EventStream, ObjectInfo, StorageError};

const EVENT_CAPACITY: usize = 1024;

#[derive(Clone)]
struct StoredObject {
    content: Bytes,
    info: ObjectInfo,
}

/// A broadcast notification: the S3 event name plus the decoded event.
type Broadcast = (String, NotificationEvent);

/// [`BlobStore`] kept entirely in memory.
pub struct InMemoryBlobStore {
    bucket: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    events: broadcast::Sender<Broadcast>,
}

impl InMemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Broadcast `event` again under `event_name`.
    pub fn redeliver(&self, event_name: &str, event: NotificationEvent) {
        // No receivers is not an error here.
        let _ = self.events.send((event_name.to_string(), event));
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StorageError {
        StorageError::Transport("in-memory blob store lock poisoned".into())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        content: Bytes,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let etag = hex_sha256(&content);
        let size = content.len() as u64;
        let info = ObjectInfo {
            key: key.to_string(),
            etag: etag.clone(),
            size,
            last_modified: Some(Utc::now()),
        };
        self.objects
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(key.to_string(), StoredObject { content, info });

        self.redeliver(
            "s3:ObjectCreated:Put",
            NotificationEvent::created(key, etag.clone(), size),
        );
        Ok(etag)
    }

    async fn get(&self, key: &str) -> Result<ByteStream, StorageError> {
        let content = self
            .objects
            .read()
            .map_err(|_| Self::poisoned())?
            .get(key)
            .map(|o| o.content.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(stream::once(async move { Ok(content) }).boxed())
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, StorageError> {
        Ok(self
            .objects
            .read()
            .map_err(|_| Self::poisoned())?
            .values()
            .map(|o| o.info.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let removed = self
            .objects
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(key);
        if let Some(obj) = removed {
            self.redeliver(
                "s3:ObjectRemoved:Delete",
                NotificationEvent {
                    operation: OperationType::Removed,
                    key: key.to_string(),
                    id: obj.info.etag,
                    size: 0,
                },
            );
        }
        Ok(())
    }

    async fn subscribe(&self, filters: &[String]) -> Result<EventStream, StorageError> {
        let filter = EventFilter::new(filters)?;
        let rx = self.events.subscribe();
        let events = BroadcastStream::new(rx)
            .filter_map(move |item| {
                let out = match item {
                    Ok((name, event)) if filter.matches(&name) => Some(Ok(event)),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(n)) => Some(Err(StorageError::Transport(
                        format!("notification subscriber lagged by {} events", n),
                    ))),
                };
                futures::future::ready(out)
            })
            .boxed();
        Ok(events)
    }

    fn locator(&self, key: &str) -> String {
        format!("memory://{}/{}", self.bucket, key)
    }
}
