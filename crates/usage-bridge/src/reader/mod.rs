//! Upstream event reading
//!
//! An [`EventSource`] fetches raw pages from the upstream feed. An
//! [`EventReader`] walks those pages once, starting after a cursor, and stops
//! at the first event that is younger than the minimum age. Younger events
//! may still be reordered upstream, so they are left for a later cycle.

mod http;

pub use http::{HttpEventSource, PagingStatistics, PagingStatisticsSnapshot};

use async_trait::async_trait;
use chrono::TimeDelta;
use serde_json::Value;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::debug;

use crate::{clock::Clock, model::Event, BridgeError, Result};

/// Error code the upstream feed returns with a 400 for an unknown cursor
pub const CURSOR_NOT_FOUND_CODE: i64 = 10005;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Upstream answered {status}")]
    Status { status: u16, body: Option<Value> },

    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Missing upstream token")]
    MissingToken,

    #[error("Malformed upstream page: {0}")]
    Decode(String),

    #[error("Invalid events URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl SourceError {
    /// Whether the upstream rejected the cursor the page was requested after
    pub fn is_cursor_not_found(&self) -> bool {
        match self {
            SourceError::Status {
                status: 400,
                body: Some(body),
            } => body.get("code").and_then(Value::as_i64) == Some(CURSOR_NOT_FOUND_CODE),
            _ => false,
        }
    }
}

/// Which page to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// The first page of events after the cursor, or from the beginning
    After(Option<String>),
    /// A follow-up page, as linked by the previous page
    Link(String),
}

/// One page of upstream events, in feed order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub next: Option<String>,
}

#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_page(&self, request: PageRequest) -> std::result::Result<EventPage, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Start,
    Next(String),
    Exhausted,
}

/// Single-pass iterator over the upstream events after a cursor
pub struct EventReader {
    source: Arc<dyn EventSource>,
    cursor: Option<String>,
    min_age: TimeDelta,
    clock: Arc<dyn Clock>,
    buffer: VecDeque<Event>,
    position: Position,
    horizon_reached: bool,
}

impl EventReader {
    pub fn new(
        source: Arc<dyn EventSource>,
        cursor: Option<String>,
        min_age: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            cursor,
            min_age: TimeDelta::from_std(min_age).unwrap_or(TimeDelta::MAX),
            clock,
            buffer: VecDeque::new(),
            position: Position::Start,
            horizon_reached: false,
        }
    }

    /// Next event old enough to be processed, or `None` once the feed or
    /// the age horizon is reached. Both are final for this reader.
    pub async fn next_event(&mut self) -> Result<Option<Event>> {
        if self.horizon_reached {
            return Ok(None);
        }

        loop {
            if let Some(event) = self.buffer.pop_front() {
                let age = self.clock.now() - event.created_at;
                if age <= self.min_age {
                    debug!(guid = %event.id, age_ms = age.num_milliseconds(), "Reached event age horizon");
                    self.horizon_reached = true;
                    self.buffer.clear();
                    self.position = Position::Exhausted;
                    return Ok(None);
                }
                return Ok(Some(event));
            }

            let request = match &self.position {
                Position::Start => PageRequest::After(self.cursor.clone()),
                Position::Next(link) => PageRequest::Link(link.clone()),
                Position::Exhausted => return Ok(None),
            };

            let page = self.source.fetch_page(request).await.map_err(|e| {
                if e.is_cursor_not_found() {
                    BridgeError::CursorNotFound {
                        cursor: self.cursor.clone(),
                    }
                } else {
                    BridgeError::Source(e)
                }
            })?;

            debug!(events = page.events.len(), has_next = page.next.is_some(), "Read page");
            self.position = match page.next {
                Some(link) => Position::Next(link),
                None => Position::Exhausted,
            };
            self.buffer.extend(page.events);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;

    /// Source replaying canned pages and recording every request
    #[derive(Default)]
    struct ScriptedSource {
        pages: Mutex<VecDeque<std::result::Result<EventPage, SourceError>>>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<std::result::Result<EventPage, SourceError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<PageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn fetch_page(&self, request: PageRequest) -> std::result::Result<EventPage, SourceError> {
            self.requests.lock().unwrap().push(request);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(EventPage::default()))
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn event(id: &str, seconds: i64) -> Event {
        Event::new(id, at(seconds), json!({}))
    }

    fn page(events: Vec<Event>, next: Option<&str>) -> std::result::Result<EventPage, SourceError> {
        Ok(EventPage {
            events,
            next: next.map(str::to_string),
        })
    }

    fn reader(source: Arc<ScriptedSource>, cursor: Option<&str>, now: i64) -> EventReader {
        EventReader::new(
            source,
            cursor.map(str::to_string),
            Duration::from_secs(60),
            Arc::new(ManualClock::new(at(now))),
        )
    }

    async fn drain(reader: &mut EventReader) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(event) = reader.next_event().await.unwrap() {
            ids.push(event.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_follows_page_links() {
        let source = ScriptedSource::new(vec![
            page(vec![event("a", 0), event("b", 10)], Some("/page2")),
            page(vec![event("c", 20)], None),
        ]);
        let mut reader = reader(source.clone(), Some("start"), 1_000);

        assert_eq!(drain(&mut reader).await, ["a", "b", "c"]);
        assert_eq!(
            source.requests(),
            [
                PageRequest::After(Some("start".to_string())),
                PageRequest::Link("/page2".to_string())
            ]
        );

        // Exhausted readers never go back to the source
        assert!(reader.next_event().await.unwrap().is_none());
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_horizon_is_final() {
        let source = ScriptedSource::new(vec![page(
            vec![event("old", 0), event("young", 950), event("older", 10)],
            Some("/page2"),
        )]);
        let mut reader = reader(source.clone(), None, 1_000);

        assert_eq!(drain(&mut reader).await, ["old"]);
        for _ in 0..3 {
            assert!(reader.next_event().await.unwrap().is_none());
        }
        assert_eq!(source.requests(), [PageRequest::After(None)]);
    }

    #[tokio::test]
    async fn test_event_exactly_min_age_is_held_back() {
        let source = ScriptedSource::new(vec![page(vec![event("edge", 940)], None)]);
        let mut reader = reader(source, None, 1_000);
        assert!(reader.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_cursor_is_classified() {
        let source = ScriptedSource::new(vec![Err(SourceError::Status {
            status: 400,
            body: Some(json!({ "code": 10005, "description": "Invalid guid" })),
        })]);
        let mut reader = reader(source, Some("gone"), 1_000);

        match reader.next_event().await.unwrap_err() {
            BridgeError::CursorNotFound { cursor } => assert_eq!(cursor.as_deref(), Some("gone")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let source = ScriptedSource::new(vec![Err(SourceError::Status {
            status: 400,
            body: Some(json!({ "code": 1 })),
        })]);
        let mut reader = reader(source, Some("c"), 1_000);

        let err = reader.next_event().await.unwrap_err();
        assert!(matches!(err, BridgeError::Source(SourceError::Status { status: 400, .. })));
    }
}
