use std::{sync::Mutex, time::Duration};
use tokio::time::Instant;

use crate::bridge::{UsageObserver, UsageOutcome};

/// Flags the bridge unhealthy when a failure has gone without a following
/// success for longer than `threshold`
#[derive(Debug)]
pub struct HealthChecker {
    threshold: Duration,
    failing_since: Mutex<Option<Instant>>,
}

impl HealthChecker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            failing_since: Mutex::new(None),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match *self.failing_since.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(since) => since.elapsed() <= self.threshold,
            None => true,
        }
    }
}

impl UsageObserver for HealthChecker {
    fn observe(&self, outcome: &UsageOutcome) {
        let mut failing_since = self.failing_since.lock().unwrap_or_else(|e| e.into_inner());
        match outcome {
            UsageOutcome::Failure { .. } => {
                failing_since.get_or_insert_with(Instant::now);
            },
            UsageOutcome::Success { .. } => *failing_since = None,
            UsageOutcome::Skip | UsageOutcome::Conflict => {},
        }
    }
}
