//! Retry policy for operations that failed to apply.
//!
//! A failed operation stays in the queue with its attempt count raised by
//! one. Once the count reaches the drop threshold it is moved to the dead
//! letter store instead. An optional backoff spaces attempts out so a
//! flapping remote is not hammered every pass.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::error::FailureKind;

/// Default number of failed attempts after which an operation is dropped.
pub const DEFAULT_DROP_THRESHOLD: u32 = 5;

/// Exponential backoff between attempts of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    /// Delay after the first failure.
    #[serde(with = "duration_ms", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    /// Cap for exponential growth.
    #[serde(with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Spread delays by +/- 25%.
    pub jitter: bool,
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the next attempt, given how many attempts have failed.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let delay = if self.jitter {
            capped * (0.75 + rand::random::<f64>() * 0.5)
        } else {
            capped
        };

        Duration::from_millis(delay as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// What to do with an operation after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Keep it queued. `not_before` is the earliest next attempt, if backing off.
    Retry { not_before: Option<i64> },
    /// Move it to the dead letter store.
    Drop { reason: String },
}

/// Decides whether a failed operation is retried or dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempt count at which an operation is dropped.
    pub drop_threshold: u32,
    /// Spacing between attempts. `None` retries on every pass.
    pub backoff: Option<Backoff>,
    /// Drop permanent and validation failures on the first attempt.
    pub drop_permanent_failures: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            drop_threshold: DEFAULT_DROP_THRESHOLD,
            backoff: None,
            drop_permanent_failures: false,
        }
    }
}

impl RetryPolicy {
    pub fn with_drop_threshold(mut self, threshold: u32) -> Self {
        self.drop_threshold = threshold.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_drop_permanent_failures(mut self, drop: bool) -> Self {
        self.drop_permanent_failures = drop;
        self
    }

    /// Classify a failure. `attempts` already counts the failure being judged.
    pub fn disposition(&self, attempts: u32, kind: FailureKind, now: i64) -> Disposition {
        if self.drop_permanent_failures && kind.is_permanent() {
            return Disposition::Drop {
                reason: format!("{kind} failure"),
            };
        }
        if attempts >= self.drop_threshold {
            return Disposition::Drop {
                reason: format!("gave up after {attempts} attempts"),
            };
        }
        let not_before = self.backoff.as_ref().map(|backoff| {
            let delay = backoff.delay_after(attempts).as_millis();
            now.saturating_add(i64::try_from(delay).unwrap_or(i64::MAX))
        });
        Disposition::Retry { not_before }
    }
}
