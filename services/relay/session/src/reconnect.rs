//! Bounded, fixed-delay reconnect policy.

use std::time::Duration;
use tracing::debug;

/// Default bound on consecutive reconnect attempts
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default delay between a disconnect and the next connection attempt
pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Result of reporting a disconnect to the policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// A new attempt is scheduled after `delay`
    Retry {
        /// 1-based attempt number
        attempt: u32,
        /// Configured bound
        max: u32,
        /// Delay before connecting
        delay: Duration,
    },
    /// An attempt is already pending; nothing new was scheduled
    AlreadyScheduled,
    /// The bound is reached; the relay must terminate
    Exhausted {
        /// Attempts made since the last successful open
        attempts: u32,
    },
}

/// Counts consecutive reconnect attempts between successful opens
#[derive(Debug)]
pub struct ReconnectPolicy {
    /// Attempts scheduled since the last successful open
    attempts: u32,
    /// Bound on `attempts`
    max_attempts: u32,
    /// Fixed delay before each attempt
    delay: Duration,
    /// Whether a timer is armed and has not fired yet
    scheduled: bool,
}

impl ReconnectPolicy {
    /// Create a policy with the given bound and delay
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            delay,
            scheduled: false,
        }
    }

    /// Report a disconnect and decide whether to retry
    pub fn on_disconnect(&mut self) -> ReconnectDecision {
        if self.scheduled {
            return ReconnectDecision::AlreadyScheduled;
        }
        if self.attempts >= self.max_attempts {
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        self.scheduled = true;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            max: self.max_attempts,
            delay: self.delay,
        }
    }

    /// The armed timer fired; returns whether one was actually pending
    pub fn on_timer_fired(&mut self) -> bool {
        std::mem::replace(&mut self.scheduled, false)
    }

    /// A session opened; returns the attempt count that is being cleared
    pub fn record_success(&mut self) -> u32 {
        let previous = std::mem::take(&mut self.attempts);
        if previous > 0 {
            debug!("Reconnected after {} attempt(s), counter reset", previous);
        }
        previous
    }

    /// Attempts scheduled since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY)
    }
}
