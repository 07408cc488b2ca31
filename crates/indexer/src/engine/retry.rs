//! Bounded retry for dependency races.
//!
//! The policy owns its clock: production sleeps on tokio, tests inject a
//! [`Sleeper`] that returns immediately (and may mutate state in between).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Source of delays between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failed attempt.
    Fixed(Duration),

    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential {
        /// Delay after the first failed attempt
        base: Duration,
        /// Upper bound
        max: Duration,
    },
}

impl Backoff {
    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(interval) => interval,
            Backoff::Exponential { base, max } => {
                let shift = attempt.saturating_sub(1).min(31);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

/// How often and how patiently to retry a missing dependency.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    /// Policy with the given schedule on the tokio clock. At least one
    /// attempt is always made.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// `max_attempts` tries, `interval` apart.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self::new(max_attempts, Backoff::Fixed(interval))
    }

    /// Replace the clock.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Total number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay schedule.
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Wait out the delay that follows failed attempt `attempt`.
    pub async fn pause(&self, attempt: u32) {
        self.sleeper.sleep(self.backoff.delay(attempt)).await;
    }
}

impl Default for RetryPolicy {
    /// Five attempts one second apart.
    fn default() -> Self {
        Self::fixed(5, Duration::from_secs(1))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
