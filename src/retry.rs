//! When to give a failed subscription another attempt.

use crate::subscription::Subscription;
use crate::types::{Clock, SystemClock};
use std::fmt;
use std::time::Duration;

/// Decides whether an errored subscription is retried in the current cycle.
pub trait RetryStrategy: Send + Sync {
    fn should_retry(&self, subscription: &Subscription) -> bool;
}

/// Never retry. Failed subscriptions wait for `reactivate`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetryStrategy;

impl RetryStrategy for NoRetryStrategy {
    fn should_retry(&self, _subscription: &Subscription) -> bool {
        false
    }
}

/// Retry on every cycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysRetryStrategy;

impl RetryStrategy for AlwaysRetryStrategy {
    fn should_retry(&self, _subscription: &Subscription) -> bool {
        true
    }
}

/// Exponential backoff measured from the subscription's last save.
///
/// The wait before attempt `n + 1` is `base_delay * delay_factor^n`, capped
/// at `max_delay` when set. No retries after `max_attempts`.
pub struct ClockBasedRetryStrategy {
    pub base_delay: Duration,
    pub delay_factor: f64,
    pub max_delay: Option<Duration>,
    pub max_attempts: u32,
    clock: Box<dyn Clock>,
}

impl ClockBasedRetryStrategy {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            delay_factor: 2.0,
            max_delay: None,
            max_attempts: 5,
            clock: Box::new(clock),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_delay_factor(mut self, delay_factor: f64) -> Self {
        self.delay_factor = delay_factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Wait required after `attempt` previous retries.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.delay_factor.powi(exponent);

        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for ClockBasedRetryStrategy {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl fmt::Debug for ClockBasedRetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockBasedRetryStrategy")
            .field("base_delay", &self.base_delay)
            .field("delay_factor", &self.delay_factor)
            .field("max_delay", &self.max_delay)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl RetryStrategy for ClockBasedRetryStrategy {
    fn should_retry(&self, subscription: &Subscription) -> bool {
        if subscription.retry_attempt() >= self.max_attempts {
            return false;
        }

        let Some(last_saved_at) = subscription.last_saved_at() else {
            return false;
        };

        let delay = self.calculate_delay(subscription.retry_attempt());
        self.clock.now() >= last_saved_at.saturating_add(delay)
    }
}
