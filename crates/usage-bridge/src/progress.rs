//! Bridge progress
//!
//! Keeps the cursor of the last fully processed event in memory and persists
//! it through a [`CheckpointCache`] after every change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::{checkpoint::CheckpointCache, model::Progress, Result};

/// Persisted form of [`Progress`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(rename = "lastRecordedGUID", default)]
    pub last_recorded_guid: Option<String>,
    #[serde(rename = "lastRecordedTimestamp", default)]
    pub last_recorded_timestamp: Option<DateTime<Utc>>,
}

impl From<&Progress> for ProgressRecord {
    fn from(progress: &Progress) -> Self {
        Self {
            last_recorded_guid: progress.guid.clone(),
            last_recorded_timestamp: progress.timestamp,
        }
    }
}

impl From<ProgressRecord> for Progress {
    fn from(record: ProgressRecord) -> Self {
        Progress::new(record.last_recorded_guid, record.last_recorded_timestamp)
    }
}

pub struct ProgressTracker {
    cache: CheckpointCache<ProgressRecord>,
    current: Mutex<Progress>,
}

impl ProgressTracker {
    /// Create a tracker that starts at `seed` until a stored checkpoint is loaded.
    pub fn new(cache: CheckpointCache<ProgressRecord>, seed: Option<String>) -> Self {
        Self {
            cache,
            current: Mutex::new(Progress::new(seed, None)),
        }
    }

    /// Replace the in-memory progress with the stored checkpoint, if any.
    pub async fn load(&self) -> Result<Progress> {
        if let Some(record) = self.cache.read().await? {
            let progress = Progress::from(record);
            info!(guid = ?progress.guid, timestamp = ?progress.timestamp, "Loaded progress");
            self.set(progress);
        } else {
            debug!("No stored progress, keeping initial cursor");
        }
        Ok(self.get())
    }

    /// Record `progress` in memory, then persist it.
    ///
    /// The in-memory value stays advanced even if the write fails.
    pub async fn save(&self, progress: Progress) -> Result<()> {
        let record = ProgressRecord::from(&progress);
        self.set(progress);
        self.cache.write(&record).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        info!("Clearing progress");
        self.save(Progress::default()).await
    }

    pub fn get(&self) -> Progress {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set(&self, progress: Progress) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = progress;
    }
}
