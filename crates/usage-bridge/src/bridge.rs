//! The polling bridge
//!
//! Every cycle reads upstream events after the saved cursor, turns each one
//! into zero or more usage documents, reports them and checkpoints the event
//! before moving on. Cycles run one at a time on a single task. A clean
//! cycle resets the backoff, a failed one makes the next wait longer.

use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clock::Clock,
    delay::{whole_millis, DelayGenerator},
    executor::Executable,
    model::{Event, MappedEvent, Progress, ReportResponse, Usage},
    progress::ProgressTracker,
    reader::{EventReader, EventSource},
    BridgeError, Result,
};

// ============================================================================
// Collaborators
// ============================================================================

/// Drops events before they are mapped. `true` means drop.
pub trait EventFilter: Send + Sync {
    fn filter(&self, event: &Event) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn filter(&self, event: &Event) -> bool {
        self(event)
    }
}

/// An event the mapper refuses on business grounds. The event is skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BusinessError(pub String);

pub trait EventMapper: Send + Sync {
    fn to_multiple_events(&self, event: &Event) -> std::result::Result<Vec<MappedEvent>, BusinessError>;
}

/// Maps every event to its own payload
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl EventMapper for IdentityMapper {
    fn to_multiple_events(&self, event: &Event) -> std::result::Result<Vec<MappedEvent>, BusinessError> {
        Ok(vec![event.payload.clone()])
    }
}

/// Builds a usage document. `None` skips the event.
pub trait EventConverter: Send + Sync {
    fn convert(&self, event: &MappedEvent) -> Option<Usage>;
}

impl<F> EventConverter for F
where
    F: Fn(&MappedEvent) -> Option<Usage> + Send + Sync,
{
    fn convert(&self, event: &MappedEvent) -> Option<Usage> {
        self(event)
    }
}

/// Ledger of reported usage, keyed by upstream event id
#[async_trait]
pub trait CarryOver: Send + Sync {
    async fn adjust_timestamp(&self, usage: Usage, event_id: &str) -> Result<Usage>;

    async fn write(
        &self,
        usage: &Usage,
        response: &ReportResponse,
        event_id: &str,
        state: Option<&str>,
    ) -> Result<()>;
}

#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn report(&self, usage: &Usage) -> Result<ReportResponse>;
}

/// Per-event outcome of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageOutcome {
    /// The event is processed and checkpointed
    Success { elapsed: Duration },
    /// The event (or the rest of its mapped events) produced no usage
    Skip,
    /// The collector already had the usage
    Conflict,
    /// The cycle stopped on this error
    Failure { message: String },
}

pub trait UsageObserver: Send + Sync {
    fn observe(&self, outcome: &UsageOutcome);
}

/// How a cycle ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No more events, or the age horizon was reached
    Clean { processed: usize },
    /// The upstream forgot the cursor and progress was cleared
    CursorInvalid,
}

pub struct BridgeCollaborators {
    pub source: Arc<dyn EventSource>,
    pub clock: Arc<dyn Clock>,
    pub min_age: Duration,
    pub filters: Vec<Arc<dyn EventFilter>>,
    pub mapper: Arc<dyn EventMapper>,
    pub converter: Arc<dyn EventConverter>,
    pub carry_over: Arc<dyn CarryOver>,
    pub reporter: Arc<dyn UsageReporter>,
    pub progress: Arc<ProgressTracker>,
    pub delay: DelayGenerator,
    pub observers: Vec<Arc<dyn UsageObserver>>,
}

// ============================================================================
// Bridge
// ============================================================================

struct BridgeCore {
    source: Arc<dyn EventSource>,
    clock: Arc<dyn Clock>,
    min_age: Duration,
    filters: Vec<Arc<dyn EventFilter>>,
    mapper: Arc<dyn EventMapper>,
    converter: Arc<dyn EventConverter>,
    carry_over: Arc<dyn CarryOver>,
    reporter: Arc<dyn UsageReporter>,
    progress: Arc<ProgressTracker>,
    delay: Mutex<DelayGenerator>,
    observers: Vec<Arc<dyn UsageObserver>>,
}

struct Worker {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

pub struct EventBridge {
    core: Arc<BridgeCore>,
    worker: Mutex<Option<Worker>>,
}

impl EventBridge {
    pub fn new(collaborators: BridgeCollaborators) -> Self {
        let BridgeCollaborators {
            source,
            clock,
            min_age,
            filters,
            mapper,
            converter,
            carry_over,
            reporter,
            progress,
            delay,
            observers,
        } = collaborators;

        Self {
            core: Arc::new(BridgeCore {
                source,
                clock,
                min_age,
                filters,
                mapper,
                converter,
                carry_over,
                reporter,
                progress,
                delay: Mutex::new(delay),
                observers,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Arm the first polling timer and return.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return Err(BridgeError::AlreadyStarted);
        }

        let first = self.core.next_delay();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.core.clone().work(first, cancel.clone()));
        info!(first_delay_ms = whole_millis(first), "Bridge started");

        *worker = Some(Worker {
            cancel,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Cancel the pending timer. A cycle already running finishes but does
    /// not schedule another one.
    pub fn stop(&self) {
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(worker) = worker.as_ref() {
            worker.cancel.cancel();
            info!("Bridge stopping");
        }
    }

    /// Wait for the worker to exit after [`stop`](Self::stop).
    pub async fn join(&self) {
        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            worker.take().and_then(|mut w| w.handle.take())
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Bridge worker panicked");
            }
        }
    }

    /// Run one cycle and return the delay before the next one.
    pub async fn poll_once(&self) -> Duration {
        self.core.poll_once().await
    }

    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.core.run_cycle().await
    }

    pub async fn process_event(&self, event: &Event) -> Result<()> {
        self.core.process_event(event).await
    }
}

#[async_trait]
impl Executable for EventBridge {
    async fn start(&self) -> anyhow::Result<()> {
        EventBridge::start(self)?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        EventBridge::stop(self);
        self.join().await;
        Ok(())
    }
}

impl BridgeCore {
    fn next_delay(&self) -> Duration {
        self.delay
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_delay()
    }

    async fn work(self: Arc<Self>, first: Duration, cancel: CancellationToken) {
        let mut delay = first;
        loop {
            debug!(
                delay_ms = whole_millis(delay),
                guid = ?self.progress.get().guid,
                "Scheduling event polling"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {},
            }

            delay = self.poll_once().await;
            if cancel.is_cancelled() {
                break;
            }
        }
        info!("Bridge stopped");
    }

    async fn poll_once(&self) -> Duration {
        let clean = match self.run_cycle().await {
            Ok(outcome) => {
                debug!(?outcome, "Cycle finished");
                true
            },
            Err(e) => {
                error!(error = %e, "Error polling events");
                false
            },
        };

        let mut delay = self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if clean {
            delay.reset();
        }
        delay.next_delay()
    }

    async fn run_cycle(&self) -> Result<CycleOutcome> {
        let cursor = self.progress.get().guid;
        debug!(guid = ?cursor, "Polling events");

        let mut reader = EventReader::new(
            self.source.clone(),
            cursor,
            self.min_age,
            self.clock.clone(),
        );

        let mut processed = 0;
        loop {
            match self.next(&mut reader).await {
                Ok(true) => processed += 1,
                Ok(false) => return Ok(CycleOutcome::Clean { processed }),
                Err(BridgeError::CursorNotFound { cursor }) => {
                    warn!(guid = ?cursor, "Upstream cannot find cursor, restarting from the beginning");
                    if let Err(e) = self.progress.clear().await {
                        error!(error = %e, "Failed to clear progress");
                    }
                    return Ok(CycleOutcome::CursorInvalid);
                },
                Err(e) => {
                    error!(error = %e, processed, "Failed to process event");
                    self.notify(&UsageOutcome::Failure {
                        message: e.to_string(),
                    });
                    return Err(e);
                },
            }
        }
    }

    /// Process and checkpoint the next event. `false` when there is none.
    async fn next(&self, reader: &mut EventReader) -> Result<bool> {
        let Some(event) = reader.next_event().await? else {
            return Ok(false);
        };
        debug!(guid = %event.id, "Event polled");

        let started = Instant::now();
        self.process_event(&event).await?;
        self.progress.save(Progress::of(&event)).await?;
        self.notify(&UsageOutcome::Success {
            elapsed: started.elapsed(),
        });
        Ok(true)
    }

    async fn process_event(&self, event: &Event) -> Result<()> {
        if self.filters.iter().any(|f| f.filter(event)) {
            debug!(guid = %event.id, "Event filtered");
            self.notify(&UsageOutcome::Skip);
            return Ok(());
        }

        let mapped = match self.mapper.to_multiple_events(event) {
            Ok(mapped) => mapped,
            Err(e) => {
                debug!(guid = %event.id, reason = %e, "Event rejected by mapper");
                self.notify(&UsageOutcome::Skip);
                return Ok(());
            },
        };

        for mapped_event in &mapped {
            // The remaining mapped events of this upstream event are dropped too
            let Some(usage) = self.converter.convert(mapped_event) else {
                debug!(guid = %event.id, "Event skipped");
                self.notify(&UsageOutcome::Skip);
                return Ok(());
            };

            let usage = self.carry_over.adjust_timestamp(usage, &event.id).await?;
            self.send_usage(&usage, event).await?;
        }
        Ok(())
    }

    async fn send_usage(&self, usage: &Usage, event: &Event) -> Result<()> {
        let response = self.reporter.report(usage).await?;

        if response.is_created() {
            debug!(guid = %event.id, location = ?response.location, "Usage reported");
            self.carry_over
                .write(usage, &response, &event.id, event.state.as_deref())
                .await
        } else if response.is_conflict() {
            debug!(guid = %event.id, "Usage already reported");
            self.notify(&UsageOutcome::Conflict);
            Ok(())
        } else {
            Err(BridgeError::UnexpectedReport {
                status: response.status,
                body: response.body,
            })
        }
    }

    fn notify(&self, outcome: &UsageOutcome) {
        for observer in &self.observers {
            observer.observe(outcome);
        }
    }
}
