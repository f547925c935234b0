//! Keepalive timing
//!
//! [`KeepaliveTimer`] is a pure transition function over [`KeepaliveState`]:
//! it never touches a clock or a device, so every decision can be tested with
//! synthetic instants.

use std::time::Duration;
use tokio::time::Instant;

use crate::error::ConfigError;

/// Stand-in for "never" when a deadline does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `at + by`, clamped instead of overflowing for very long durations
pub fn saturating_deadline(at: Instant, by: Duration) -> Instant {
    at.checked_add(by)
        .or_else(|| at.checked_add(FAR_FUTURE))
        .unwrap_or(at)
}

/// Outcome of one `KEEPALIVE` exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkResult {
    Ack,
    Timeout,
    /// A non-empty line that was not the acknowledgement token. Holds the
    /// line as received minus its terminator and surrounding whitespace.
    Malformed(Vec<u8>),
}

impl LinkResult {
    pub fn is_ack(&self) -> bool {
        matches!(self, LinkResult::Ack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveState {
    /// None until the first probe goes out
    pub last_sent: Option<Instant>,
    pub last_ack: Option<Instant>,
    pub consecutive_misses: u32,
    pub interval: Duration,
}

impl KeepaliveState {
    pub fn new(interval: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(Self {
            last_sent: None,
            last_ack: None,
            consecutive_misses: 0,
            interval,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveTimer {
    /// Miss streak length that gets reported; 0 disables reporting
    report_after: u32,
}

impl Default for KeepaliveTimer {
    fn default() -> Self {
        Self { report_after: 3 }
    }
}

impl KeepaliveTimer {
    pub fn new(report_after: u32) -> Self {
        Self { report_after }
    }

    pub fn should_probe_now(&self, state: &KeepaliveState, now: Instant) -> bool {
        match state.last_sent {
            None => true,
            Some(sent) => now.saturating_duration_since(sent) >= state.interval,
        }
    }

    /// Earliest instant at which the next probe may go out.
    ///
    /// Measured from the previous send, so a slow probe eats into the wait
    /// instead of stretching the period. Never earlier than `now` for a fresh
    /// state.
    pub fn next_probe_at(&self, state: &KeepaliveState, now: Instant) -> Instant {
        match state.last_sent {
            None => now,
            Some(sent) => saturating_deadline(sent, state.interval),
        }
    }

    pub fn mark_sent(&self, state: &KeepaliveState, now: Instant) -> KeepaliveState {
        KeepaliveState {
            last_sent: Some(now),
            ..*state
        }
    }

    pub fn record_result(&self, state: &KeepaliveState, result: &LinkResult, now: Instant) -> KeepaliveState {
        match result {
            LinkResult::Ack => KeepaliveState {
                last_ack: Some(now),
                consecutive_misses: 0,
                ..*state
            },
            LinkResult::Timeout | LinkResult::Malformed(_) => KeepaliveState {
                consecutive_misses: state.consecutive_misses.saturating_add(1),
                ..*state
            },
        }
    }

    /// Returns the streak length the moment it reaches the report threshold.
    ///
    /// Fires once per streak; acting on it is left to whoever watches the
    /// supervisor.
    pub fn streak_to_report(&self, state: &KeepaliveState) -> Option<u32> {
        if self.report_after > 0 && state.consecutive_misses == self.report_after {
            Some(state.consecutive_misses)
        } else {
            None
        }
    }
}
