// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Offline mutation queue with pluggable durable storage.
//!
//! One ordered FIFO per device, behind one interface, with two backends:
//!
//! - [`SimpleQueueStore`]: the whole queue serialized as one blob under a
//!   per-device key in an injected key-value engine. O(n) per operation,
//!   adequate for small queues and environments without an embedded
//!   database.
//! - [`IndexedQueueStore`]: one SQLite-backed row per item with an ordering
//!   index on `created_at`, transactional delete-on-read dequeue.
//!
//! [`open_queue_store`] picks the indexed backend when SQLite initializes
//! and silently falls back to the simple one otherwise; callers see the
//! same interface and semantics either way.
//!
//! Storage-layer errors propagate to the caller as-is. There is no retry
//! here: retry policy belongs to whoever drains the queue.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::clock::{generate_id, ClockSource};
use crate::conflict::QueueOrd;
use crate::db::Database;
use crate::error::{Error, Result};

/// One pending mutation/notification destined for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// `{epoch_ms}-{rand36}`, stamped by `enqueue`. Monotonic enough for
    /// FIFO ordering within one process, not globally unique.
    pub id: String,
    /// Free-form tag describing the mutation.
    pub kind: String,
    /// Opaque payload, interpreted by the consumer.
    pub payload: Value,
    /// Creation time, epoch-ms, stamped by `enqueue`.
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueOrd for QueueItem {
    fn queue_id(&self) -> &str {
        &self.id
    }

    fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }
}

/// The persisted envelope for one device's queue (simple backend).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceQueue {
    pub device_id: String,
    pub pending: Vec<QueueItem>,
    /// Id of the last item a background consumer acted on. Once advanced,
    /// never moves backward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_cursor: Option<String>,
    pub updated_at_ms: u64,
}

/// Durable key-value collaborator used by the simple backend.
///
/// Injected per store instance so tests can supply an in-memory fake
/// (see the design note on replacing implicit global storage access).
#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Lists keys with the given prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Ordered, durable FIFO of pending mutations for one device.
///
/// All operations are async for interface uniformity even where the
/// underlying storage is synchronous.
#[async_trait]
pub trait OfflineQueueStore: Send + Sync {
    /// Appends a mutation, stamping its id and creation time internally.
    /// Returns the generated id.
    async fn enqueue(&self, kind: &str, payload: Value) -> Result<String>;

    /// Removes and returns the oldest pending item, or None if empty.
    async fn dequeue(&self) -> Result<Option<QueueItem>>;

    /// Returns all pending items, oldest first, without removing them.
    async fn get_all(&self) -> Result<Vec<QueueItem>>;

    /// Removes a specific item by id. Returns true if it existed.
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Removes all pending items.
    async fn clear(&self) -> Result<()>;

    /// Number of pending items.
    async fn size(&self) -> Result<usize>;
}

/// Simple backend: the whole queue as one serialized blob per device.
pub struct SimpleQueueStore {
    device_id: String,
    engine: Arc<dyn StorageEngine>,
    clock: Arc<dyn ClockSource>,
}

impl SimpleQueueStore {
    pub fn new(
        device_id: impl Into<String>,
        engine: Arc<dyn StorageEngine>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        SimpleQueueStore { device_id: device_id.into(), engine, clock }
    }

    fn key(&self) -> String {
        format!("queue:{}", self.device_id)
    }

    async fn load(&self) -> Result<DeviceQueue> {
        match self.engine.get(&self.key()).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|_| Error::CorruptedData(format!("queue blob for '{}'", self.device_id))),
            None => Ok(DeviceQueue { device_id: self.device_id.clone(), ..DeviceQueue::default() }),
        }
    }

    async fn save(&self, mut queue: DeviceQueue) -> Result<()> {
        queue.updated_at_ms = self.clock.now_ms();
        let raw = serde_json::to_string(&queue)?;
        self.engine.set(&self.key(), &raw).await
    }
}

#[async_trait]
impl OfflineQueueStore for SimpleQueueStore {
    async fn enqueue(&self, kind: &str, payload: Value) -> Result<String> {
        let mut queue = self.load().await?;
        let item = QueueItem {
            id: generate_id(self.clock.as_ref()),
            kind: kind.to_string(),
            payload,
            created_at_ms: self.clock.now_ms(),
            retries: None,
            error: None,
        };
        let id = item.id.clone();
        queue.pending.push(item);
        self.save(queue).await?;
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueueItem>> {
        let mut queue = self.load().await?;
        if queue.pending.is_empty() {
            return Ok(None);
        }
        let item = queue.pending.remove(0);
        self.save(queue).await?;
        Ok(Some(item))
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>> {
        Ok(self.load().await?.pending)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut queue = self.load().await?;
        let before = queue.pending.len();
        queue.pending.retain(|item| item.id != id);
        let removed = queue.pending.len() != before;
        if removed {
            self.save(queue).await?;
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let mut queue = self.load().await?;
        queue.pending.clear();
        self.save(queue).await
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.load().await?.pending.len())
    }
}

/// Indexed backend: one SQLite row per item, transactional dequeue.
pub struct IndexedQueueStore {
    device_id: String,
    db: Mutex<Database>,
    clock: Arc<dyn ClockSource>,
}

impl IndexedQueueStore {
    pub fn new(device_id: impl Into<String>, db: Database, clock: Arc<dyn ClockSource>) -> Self {
        IndexedQueueStore { device_id: device_id.into(), db: Mutex::new(db), clock }
    }

    fn db(&self) -> std::sync::MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl OfflineQueueStore for IndexedQueueStore {
    async fn enqueue(&self, kind: &str, payload: Value) -> Result<String> {
        let item = QueueItem {
            id: generate_id(self.clock.as_ref()),
            kind: kind.to_string(),
            payload,
            created_at_ms: self.clock.now_ms(),
            retries: None,
            error: None,
        };
        self.db().insert_queue_item(&self.device_id, &item)?;
        Ok(item.id)
    }

    async fn dequeue(&self) -> Result<Option<QueueItem>> {
        self.db().pop_oldest_queue_item(&self.device_id)
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>> {
        self.db().list_queue_items(&self.device_id)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        self.db().remove_queue_item(&self.device_id, id)
    }

    async fn clear(&self) -> Result<()> {
        self.db().clear_queue(&self.device_id)
    }

    async fn size(&self) -> Result<usize> {
        self.db().count_queue_items(&self.device_id)
    }
}

/// Where the indexed backend should keep its database.
#[derive(Debug, Clone)]
pub enum QueueDbLocation {
    /// On-disk SQLite file.
    Path(std::path::PathBuf),
    /// In-memory database (tests, throwaway sessions).
    InMemory,
}

/// Opens the best available queue backend for a device.
///
/// Tries the indexed SQLite backend first; on any initialization failure
/// logs a warning and falls back to the simple blob backend over the
/// injected engine. The fallback is silent to the caller: same interface,
/// same semantics, only capacity and per-op cost differ.
pub fn open_queue_store(
    device_id: &str,
    location: Option<QueueDbLocation>,
    engine: Arc<dyn StorageEngine>,
    clock: Arc<dyn ClockSource>,
) -> Box<dyn OfflineQueueStore> {
    if let Some(location) = location {
        let opened = match location {
            QueueDbLocation::Path(ref path) => Database::open(path),
            QueueDbLocation::InMemory => Database::open_in_memory(),
        };
        match opened {
            Ok(db) => return Box::new(IndexedQueueStore::new(device_id, db, clock)),
            Err(e) => {
                warn!("indexed queue backend unavailable for {device_id}, falling back: {e}");
            }
        }
    }
    Box::new(SimpleQueueStore::new(device_id, engine, clock))
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
