//! Backoff delays between polling cycles
//!
//! The n-th delay since the last reset is `start + floor(e^n - 1)`
//! milliseconds, capped at `max`. The first few values stay close to `start`
//! and then grow quickly until they saturate.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DelayGenerator {
    start_ms: u64,
    max_ms: u64,
    count: u32,
}

impl DelayGenerator {
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            start_ms: whole_millis(start),
            max_ms: whole_millis(max),
            count: 0,
        }
    }

    /// Return the next delay and advance the sequence.
    pub fn next_delay(&mut self) -> Duration {
        // Float to int casts saturate, so a huge exponent simply hits the cap
        let offset = f64::from(self.count).exp_m1().floor() as u64;
        self.count = self.count.saturating_add(1);
        Duration::from_millis(self.start_ms.saturating_add(offset).min(self.max_ms))
    }

    /// Restart the sequence at `start`.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Milliseconds in `duration`, saturating at `u64::MAX`
pub fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
