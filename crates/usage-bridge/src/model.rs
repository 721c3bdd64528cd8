//! Shared data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A mapped event, produced by an `EventMapper` from one upstream event
pub type MappedEvent = Value;

/// A usage document ready to be reported
pub type Usage = Value;

/// An upstream event
///
/// The bridge itself only looks at `id` and `created_at`. `state` travels to
/// the carry-over ledger, and `payload` is handed to filters, mappers and
/// converters untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, payload: Value) -> Self {
        Self {
            id: id.into(),
            created_at,
            state: None,
            payload,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}

/// Position of the bridge in the upstream feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Id of the last fully processed event
    pub guid: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn new(guid: Option<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self { guid, timestamp }
    }

    pub fn of(event: &Event) -> Self {
        Self {
            guid: Some(event.id.clone()),
            timestamp: Some(event.created_at),
        }
    }
}

/// Answer of the usage collector to a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub status: u16,
    /// `Location` header of a created usage document
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
}

impl ReportResponse {
    pub const CREATED: u16 = 201;
    pub const CONFLICT: u16 = 409;

    pub fn new(status: u16) -> Self {
        Self {
            status,
            location: None,
            body: None,
        }
    }

    pub fn is_created(&self) -> bool {
        self.status == Self::CREATED
    }

    pub fn is_conflict(&self) -> bool {
        self.status == Self::CONFLICT
    }
}
