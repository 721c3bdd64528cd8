//! In-process bridge statistics
//!
//! Usage outcomes are counted through the [`UsageObserver`] hook, together
//! with the time spent per processed event and the last failure seen. Cache
//! and paging counters are shared with the components that own them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use crate::{
    bridge::{UsageObserver, UsageOutcome},
    checkpoint::{CacheStatistics, CacheStatisticsSnapshot},
    clock::{Clock, SystemClock},
    delay::whole_millis,
    reader::{PagingStatistics, PagingStatisticsSnapshot},
};

#[derive(Debug, Default)]
pub struct UsageStatistics {
    success: AtomicU64,
    conflicts: AtomicU64,
    skips: AtomicU64,
    failures: AtomicU64,
}

/// Usage counters. Skips and conflicts are also counted as successes once
/// their event is checkpointed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStatisticsSnapshot {
    pub success: u64,
    pub conflicts: u64,
    pub skips: u64,
    pub failures: u64,
}

/// Time spent processing and checkpointing one event
#[derive(Debug, Default)]
struct Timing {
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingSnapshot {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
    pub average_ms: u64,
}

#[derive(Debug, Default)]
struct LastError {
    message: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    consecutive_failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatisticsSnapshot {
    pub last_error: Option<String>,
    pub last_error_timestamp: Option<DateTime<Utc>>,
    /// Failed cycles since the last processed event
    pub consecutive_failures: u64,
    pub no_report_ever_happened: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub usage: UsageStatisticsSnapshot,
    pub timing: TimingSnapshot,
    pub errors: ErrorStatisticsSnapshot,
    pub cache: CacheStatisticsSnapshot,
    pub paging: PagingStatisticsSnapshot,
}

pub struct BridgeStatistics {
    usage: UsageStatistics,
    timing: Timing,
    last_error: Mutex<LastError>,
    cache: Arc<CacheStatistics>,
    paging: Arc<PagingStatistics>,
    clock: Arc<dyn Clock>,
}

impl Default for BridgeStatistics {
    fn default() -> Self {
        Self::new(Arc::default(), Arc::default())
    }
}

impl BridgeStatistics {
    pub fn new(cache: Arc<CacheStatistics>, paging: Arc<PagingStatistics>) -> Self {
        Self {
            usage: UsageStatistics::default(),
            timing: Timing::default(),
            last_error: Mutex::default(),
            cache,
            paging,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` to timestamp failures
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let usage = UsageStatisticsSnapshot {
            success: self.usage.success.load(Ordering::Relaxed),
            conflicts: self.usage.conflicts.load(Ordering::Relaxed),
            skips: self.usage.skips.load(Ordering::Relaxed),
            failures: self.usage.failures.load(Ordering::Relaxed),
        };

        let total_ms = self.timing.total_ms.load(Ordering::Relaxed);
        let timing = TimingSnapshot {
            count: usage.success,
            total_ms,
            max_ms: self.timing.max_ms.load(Ordering::Relaxed),
            average_ms: total_ms.checked_div(usage.success).unwrap_or(0),
        };

        let errors = {
            let last = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
            ErrorStatisticsSnapshot {
                last_error: last.message.clone(),
                last_error_timestamp: last.timestamp,
                consecutive_failures: last.consecutive_failures,
                no_report_ever_happened: usage.success == 0,
            }
        };

        StatisticsSnapshot {
            usage,
            timing,
            errors,
            cache: self.cache.snapshot(),
            paging: self.paging.snapshot(),
        }
    }
}

impl UsageObserver for BridgeStatistics {
    fn observe(&self, outcome: &UsageOutcome) {
        match outcome {
            UsageOutcome::Success { elapsed } => {
                let ms = whole_millis(*elapsed);
                self.timing.total_ms.fetch_add(ms, Ordering::Relaxed);
                self.timing.max_ms.fetch_max(ms, Ordering::Relaxed);
                self.last_error
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .consecutive_failures = 0;
                self.usage.success.fetch_add(1, Ordering::Relaxed);
            },
            UsageOutcome::Skip => {
                self.usage.skips.fetch_add(1, Ordering::Relaxed);
            },
            UsageOutcome::Conflict => {
                self.usage.conflicts.fetch_add(1, Ordering::Relaxed);
            },
            UsageOutcome::Failure { message } => {
                let mut last = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
                last.message = Some(message.clone());
                last.timestamp = Some(self.clock.now());
                last.consecutive_failures += 1;
                self.usage.failures.fetch_add(1, Ordering::Relaxed);
            },
        }
    }
}
