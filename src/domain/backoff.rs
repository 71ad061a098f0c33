//! Reconnect Backoff and Outage Detection
//!
//! `Backoff` doubles the reconnect delay from a base up to a cap.
//! `OutageDetector` counts consecutive connection failures inside a
//! sliding window and reports when the primary feed should be treated
//! as down.

use std::time::{Duration, Instant};

/// Capped exponential backoff: base, 2·base, 4·base, … ≤ max.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Back to the base delay after a successful session.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Flags a sustained outage after `threshold` consecutive failures that
/// all fall inside `window`.
#[derive(Debug, Clone)]
pub struct OutageDetector {
    threshold: u32,
    window: Duration,
    consecutive: u32,
    first_failure: Option<Instant>,
}

impl OutageDetector {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            consecutive: 0,
            first_failure: None,
        }
    }

    /// Record one failed attempt. Returns `true` once the failure streak
    /// reaches the threshold within the window.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        match self.first_failure {
            Some(first) if now.duration_since(first) <= self.window => {
                self.consecutive += 1;
            }
            _ => {
                self.first_failure = Some(now);
                self.consecutive = 1;
            }
        }
        self.consecutive >= self.threshold
    }

    /// A successful session clears the streak.
    pub fn record_success(&mut self) {
        self.consecutive = 0;
        self.first_failure = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }
}
