//! CouchDB-backed checkpoint store
//!
//! Uses the plain document API: `GET /{db}/{id}` and `PUT /{db}/{id}` with
//! `_id` and `_rev` carried inside the JSON body.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{CheckpointError, CheckpointStore, StoredDocument};

#[derive(Debug, Deserialize)]
struct PutResponse {
    rev: String,
}

#[derive(Debug, Clone)]
pub struct CouchCheckpointStore {
    client: Client,
    base_url: String,
    database: String,
}

impl CouchCheckpointStore {
    pub fn new(client: Client, base_url: impl Into<String>, database: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            database: database.into(),
        }
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/{}", self.database_url(), id)
    }

    /// Create the database unless it already exists.
    pub async fn ensure_database(&self) -> Result<(), CheckpointError> {
        let response = self.client.put(self.database_url()).send().await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => {
                info!(database = %self.database, "Created checkpoint database");
                Ok(())
            },
            StatusCode::PRECONDITION_FAILED => Ok(()),
            status => Err(status_error(status, response).await),
        }
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> CheckpointError {
    CheckpointError::Status {
        status: status.as_u16(),
        body: response.json::<Value>().await.ok(),
    }
}

#[async_trait]
impl CheckpointStore for CouchCheckpointStore {
    async fn get(&self, id: &str) -> Result<Option<StoredDocument>, CheckpointError> {
        let response = self.client.get(self.document_url(id)).send().await?;

        match response.status() {
            StatusCode::OK => {},
            StatusCode::NOT_FOUND => return Ok(None),
            status => return Err(status_error(status, response).await),
        }

        let mut body: Map<String, Value> = response.json().await?;
        body.remove("_id");
        let revision = match body.remove("_rev") {
            Some(Value::String(rev)) => Some(rev),
            _ => None,
        };
        debug!(id, revision = ?revision, "Fetched checkpoint document");

        Ok(Some(StoredDocument {
            id: id.to_string(),
            revision,
            body: Value::Object(body),
        }))
    }

    async fn put(&self, document: StoredDocument) -> Result<String, CheckpointError> {
        let mut body = match document.body {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            },
        };
        body.insert("_id".to_string(), Value::String(document.id.clone()));
        if let Some(rev) = &document.revision {
            body.insert("_rev".to_string(), Value::String(rev.clone()));
        }

        let response = self
            .client
            .put(self.document_url(&document.id))
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::ACCEPTED => {
                let PutResponse { rev } = response.json().await?;
                Ok(rev)
            },
            StatusCode::CONFLICT => Err(CheckpointError::Conflict { id: document.id }),
            status => Err(status_error(status, response).await),
        }
    }
}
