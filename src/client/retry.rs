//! Retry controller
//!
//! Exponential reconnection backoff with a ceiling, plus the single
//! reconnect timer.

use std::time::{Duration, Instant};

use crate::config::RetryConfig;

/// Tracks backoff state and the pending reconnect deadline
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
    delay: Duration,
    attempts: u32,
    deadline: Option<Instant>,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        let config = config.normalized();
        Self {
            config,
            delay: config.initial_delay,
            attempts: 1,
            deadline: None,
        }
    }

    /// Delay used by the most recent schedule (initial delay before any)
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Advance to the next delay: `floor(delay * multiplier)`, capped.
    pub fn advance(&mut self) -> Duration {
        let next_ms = (self.delay.as_millis() as f64 * self.config.multiplier).floor() as u64;
        self.delay = Duration::from_millis(next_ms).min(self.config.max_delay);
        self.attempts = self.attempts.saturating_add(1);
        self.delay
    }

    /// Arm the reconnect timer.
    ///
    /// Returns the delay, or `None` when a timer is already pending.
    pub fn schedule(&mut self, now: Instant) -> Option<Duration> {
        if self.deadline.is_some() {
            return None;
        }
        let delay = self.advance();
        self.deadline = Some(now + delay);
        Some(delay)
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm the timer if it is due at `now`; true when it fired
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Back to the initial delay and attempt count
    pub fn reset(&mut self) {
        self.delay = self.config.initial_delay;
        self.attempts = 1;
    }
}
