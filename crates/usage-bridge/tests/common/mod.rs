//! Shared fakes for the bridge integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde_json::{json, Value};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use usage_bridge::{
    bridge::{
        BridgeCollaborators, CarryOver, EventBridge, EventFilter, IdentityMapper, UsageObserver,
        UsageOutcome, UsageReporter,
    },
    checkpoint::{
        CacheStatistics, CheckpointCache, CheckpointError, CheckpointStore, InMemoryCheckpointStore,
        StoredDocument,
    },
    clock::ManualClock,
    delay::DelayGenerator,
    model::{Event, ReportResponse, Usage},
    progress::ProgressTracker,
    reader::{EventPage, EventSource, PageRequest, SourceError},
    Result,
};

pub const START_DELAY: Duration = Duration::from_millis(10);
pub const MAX_DELAY: Duration = Duration::from_millis(20);
pub const MIN_AGE: Duration = Duration::from_secs(60);

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// An event created `minutes_ago` before [`now`]
pub fn event(id: &str, minutes_ago: i64) -> Event {
    Event::new(
        id,
        now() - TimeDelta::minutes(minutes_ago),
        json!({ "entity": { "org_guid": "org-1", "app_guid": id } }),
    )
    .with_state("STARTED")
}

/// Upstream feed with a single page per request
///
/// A cursor that is not in the feed is rejected like the real upstream does.
#[derive(Default)]
pub struct FeedSource {
    events: Mutex<Vec<Event>>,
    fetches: AtomicUsize,
}

impl FeedSource {
    pub fn new(events: Vec<Event>) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(events),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

pub fn unknown_cursor() -> SourceError {
    SourceError::Status {
        status: 400,
        body: Some(json!({ "code": 10005, "error_code": "CF-BadQueryParameter" })),
    }
}

#[async_trait]
impl EventSource for FeedSource {
    async fn fetch_page(&self, request: PageRequest) -> std::result::Result<EventPage, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let events = self.events.lock().unwrap();
        let start = match request {
            PageRequest::After(None) => 0,
            PageRequest::After(Some(cursor)) => match events.iter().position(|e| e.id == cursor) {
                Some(index) => index + 1,
                None => return Err(unknown_cursor()),
            },
            PageRequest::Link(link) => panic!("unexpected page link {link}"),
        };
        Ok(EventPage {
            events: events[start..].to_vec(),
            next: None,
        })
    }
}

/// Checkpoint store that has no document and rejects every write
#[derive(Default)]
pub struct RejectingStore {
    puts: AtomicUsize,
}

impl RejectingStore {
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for RejectingStore {
    async fn get(&self, _id: &str) -> std::result::Result<Option<StoredDocument>, CheckpointError> {
        Ok(None)
    }

    async fn put(&self, document: StoredDocument) -> std::result::Result<String, CheckpointError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(CheckpointError::Conflict { id: document.id })
    }
}

/// Reporter answering with queued statuses, then 201
#[derive(Default)]
pub struct ScriptedReporter {
    statuses: Mutex<VecDeque<u16>>,
    reported: Mutex<Vec<Usage>>,
}

impl ScriptedReporter {
    pub fn new(statuses: &[u16]) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            reported: Mutex::default(),
        })
    }

    pub fn reported(&self) -> Vec<Usage> {
        self.reported.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageReporter for ScriptedReporter {
    async fn report(&self, usage: &Usage) -> Result<ReportResponse> {
        self.reported.lock().unwrap().push(usage.clone());
        let status = self.statuses.lock().unwrap().pop_front().unwrap_or(201);
        let mut response = ReportResponse::new(status);
        if status == ReportResponse::CREATED {
            response.location = Some("http://collector/v1/metering/collected/usage/1".to_string());
        }
        Ok(response)
    }
}

/// Carry-over recording the event ids and states it was written for
#[derive(Default)]
pub struct RecordingCarryOver {
    adjusted: AtomicUsize,
    writes: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingCarryOver {
    pub fn adjusted(&self) -> usize {
        self.adjusted.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(String, Option<String>)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl CarryOver for RecordingCarryOver {
    async fn adjust_timestamp(&self, usage: Usage, _event_id: &str) -> Result<Usage> {
        self.adjusted.fetch_add(1, Ordering::SeqCst);
        Ok(usage)
    }

    async fn write(
        &self,
        _usage: &Usage,
        _response: &ReportResponse,
        event_id: &str,
        state: Option<&str>,
    ) -> Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((event_id.to_string(), state.map(str::to_string)));
        Ok(())
    }
}

/// Observer recording every outcome together with the progress seen at
/// that moment
pub struct OutcomeLog {
    progress: Arc<ProgressTracker>,
    entries: Mutex<Vec<(UsageOutcome, Option<String>)>>,
}

impl OutcomeLog {
    pub fn outcomes(&self) -> Vec<UsageOutcome> {
        self.entries.lock().unwrap().iter().map(|(o, _)| o.clone()).collect()
    }

    /// Progress cursor observed at every success
    pub fn progress_at_success(&self) -> Vec<Option<String>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| matches!(o, UsageOutcome::Success { .. }))
            .map(|(_, guid)| guid.clone())
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&UsageOutcome) -> bool) -> usize {
        self.outcomes().iter().filter(|o| predicate(o)).count()
    }
}

impl UsageObserver for OutcomeLog {
    fn observe(&self, outcome: &UsageOutcome) {
        let guid = self.progress.get().guid;
        self.entries.lock().unwrap().push((outcome.clone(), guid));
    }
}

pub struct Harness {
    pub bridge: EventBridge,
    pub carry_over: Arc<RecordingCarryOver>,
    pub reporter: Arc<ScriptedReporter>,
    pub progress: Arc<ProgressTracker>,
    pub store: Arc<dyn CheckpointStore>,
    pub log: Arc<OutcomeLog>,
    pub clock: Arc<ManualClock>,
}

pub struct HarnessBuilder {
    source: Arc<dyn EventSource>,
    statuses: Vec<u16>,
    seed: Option<String>,
    filters: Vec<Arc<dyn EventFilter>>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl HarnessBuilder {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            source,
            statuses: Vec::new(),
            seed: None,
            filters: Vec::new(),
            store: None,
        }
    }

    pub fn statuses(mut self, statuses: &[u16]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn seed(mut self, guid: &str) -> Self {
        self.seed = Some(guid.to_string());
        self
    }

    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn EventFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn build(self) -> Harness {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>);
        let cache = CheckpointCache::new(
            store.clone(),
            "bridge-progress",
            Arc::new(CacheStatistics::default()),
        );
        let progress = Arc::new(ProgressTracker::new(cache, self.seed));
        let carry_over = Arc::new(RecordingCarryOver::default());
        let reporter = ScriptedReporter::new(&self.statuses);
        let clock = Arc::new(ManualClock::new(now()));
        let log = Arc::new(OutcomeLog {
            progress: progress.clone(),
            entries: Mutex::default(),
        });

        let bridge = EventBridge::new(BridgeCollaborators {
            source: self.source,
            clock: clock.clone(),
            min_age: MIN_AGE,
            filters: self.filters,
            mapper: Arc::new(IdentityMapper),
            converter: Arc::new(|payload: &Value| Some(json!({ "usage": payload }))),
            carry_over: carry_over.clone(),
            reporter: reporter.clone(),
            progress: progress.clone(),
            delay: DelayGenerator::new(START_DELAY, MAX_DELAY),
            observers: vec![log.clone() as Arc<dyn UsageObserver>],
        });

        Harness {
            bridge,
            carry_over,
            reporter,
            progress,
            store,
            log,
            clock,
        }
    }
}
