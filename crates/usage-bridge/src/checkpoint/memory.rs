use async_trait::async_trait;
use serde_json::Value;
use std::{collections::HashMap, sync::Mutex};

use super::{CheckpointError, CheckpointStore, StoredDocument};

/// Process-local checkpoint store
///
/// Revisions are a per-document counter rendered as a string. A write must
/// carry the current revision, or none at all when the document is new.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    documents: Mutex<HashMap<String, (u64, Value)>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, id: &str) -> Result<Option<StoredDocument>, CheckpointError> {
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        Ok(documents.get(id).map(|(revision, body)| StoredDocument {
            id: id.to_string(),
            revision: Some(revision.to_string()),
            body: body.clone(),
        }))
    }

    async fn put(&self, document: StoredDocument) -> Result<String, CheckpointError> {
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());

        let current = documents.get(&document.id).map(|(revision, _)| *revision);
        let next = match (current, document.revision.as_deref()) {
            (None, None) => 1,
            (Some(current), Some(sent)) if sent == current.to_string() => current + 1,
            _ => return Err(CheckpointError::Conflict { id: document.id }),
        };

        documents.insert(document.id, (next, document.body));
        Ok(next.to_string())
    }
}
