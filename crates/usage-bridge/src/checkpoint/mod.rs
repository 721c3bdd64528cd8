//! Checkpoint persistence
//!
//! A [`CheckpointCache`] owns a single document in a [`CheckpointStore`]. It
//! remembers the revision seen on the last successful read or write and
//! sends it along with every write, so a concurrent writer surfaces as
//! [`CheckpointError::Conflict`] instead of silently overwriting the
//! document.

mod couch;
mod memory;

pub use couch::CouchCheckpointStore;
pub use memory::InMemoryCheckpointStore;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors returned by checkpoint stores
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The revision sent with a write is not the current one
    #[error("Document update conflict for {id}")]
    Conflict { id: String },

    #[error("Checkpoint store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Checkpoint store answered {status}")]
    Status { status: u16, body: Option<Value> },

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A document as held by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    /// Revision the write is based on, or the revision read
    pub revision: Option<String>,
    pub body: Value,
}

/// Document storage with optimistic concurrency
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetch a document. A missing document is `Ok(None)`.
    async fn get(&self, id: &str) -> Result<Option<StoredDocument>, CheckpointError>;

    /// Store a document and return its new revision.
    async fn put(&self, document: StoredDocument) -> Result<String, CheckpointError>;
}

/// Read and write counters of a checkpoint cache
#[derive(Debug, Default)]
pub struct CacheStatistics {
    failed_reads: AtomicU64,
    successful_reads: AtomicU64,
    failed_writes: AtomicU64,
    successful_writes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatisticsSnapshot {
    pub failed_reads: u64,
    pub successful_reads: u64,
    pub failed_writes: u64,
    pub successful_writes: u64,
}

impl CacheStatistics {
    pub fn snapshot(&self) -> CacheStatisticsSnapshot {
        CacheStatisticsSnapshot {
            failed_reads: self.failed_reads.load(Ordering::Relaxed),
            successful_reads: self.successful_reads.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            successful_writes: self.successful_writes.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Typed read/modify/write access to one checkpoint document
pub struct CheckpointCache<T> {
    store: Arc<dyn CheckpointStore>,
    document_id: String,
    revision: Mutex<Option<String>>,
    statistics: Arc<CacheStatistics>,
    _value: PhantomData<fn() -> T>,
}

impl<T> CheckpointCache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        document_id: impl Into<String>,
        statistics: Arc<CacheStatistics>,
    ) -> Self {
        Self {
            store,
            document_id: document_id.into(),
            revision: Mutex::new(None),
            statistics,
            _value: PhantomData,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn statistics(&self) -> &Arc<CacheStatistics> {
        &self.statistics
    }

    /// Revision remembered from the last successful read or write
    pub fn revision(&self) -> Option<String> {
        self.revision
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Read the document. `Ok(None)` when it does not exist yet.
    pub async fn read(&self) -> Result<Option<T>, CheckpointError> {
        debug!(id = %self.document_id, "Reading checkpoint");

        let document = match self.store.get(&self.document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!(id = %self.document_id, "Checkpoint not found");
                return Ok(None);
            },
            Err(e) => {
                CacheStatistics::bump(&self.statistics.failed_reads);
                warn!(id = %self.document_id, error = %e, "Failed to read checkpoint");
                return Err(e);
            },
        };

        *self.revision.lock().unwrap_or_else(|e| e.into_inner()) = document.revision;

        match serde_json::from_value(document.body) {
            Ok(value) => {
                CacheStatistics::bump(&self.statistics.successful_reads);
                Ok(Some(value))
            },
            Err(e) => {
                CacheStatistics::bump(&self.statistics.failed_reads);
                warn!(id = %self.document_id, error = %e, "Malformed checkpoint document");
                Err(e.into())
            },
        }
    }

    /// Write the document based on the last known revision.
    ///
    /// The remembered revision is left untouched on failure, so a conflict
    /// keeps failing until the document is read again.
    pub async fn write(&self, value: &T) -> Result<(), CheckpointError> {
        let body = match serde_json::to_value(value) {
            Ok(body) => body,
            Err(e) => {
                CacheStatistics::bump(&self.statistics.failed_writes);
                return Err(e.into());
            },
        };

        let document = StoredDocument {
            id: self.document_id.clone(),
            revision: self.revision(),
            body,
        };
        debug!(id = %document.id, revision = ?document.revision, "Writing checkpoint");

        match self.store.put(document).await {
            Ok(revision) => {
                *self.revision.lock().unwrap_or_else(|e| e.into_inner()) = Some(revision);
                CacheStatistics::bump(&self.statistics.successful_writes);
                Ok(())
            },
            Err(e) => {
                CacheStatistics::bump(&self.statistics.failed_writes);
                warn!(id = %self.document_id, error = %e, "Failed to write checkpoint");
                Err(e)
            },
        }
    }
}
