//! Backoff policy for rate-limited upstream calls.
//!
//! A small pure policy object — max attempts, base delay, growth factor —
//! with the sleep injected through a trait, so retry behaviour is unit
//! tested deterministically without waiting wall-clock seconds. Only the
//! caller decides *which* errors are retryable; everything else propagates
//! on the first failure.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff parameters.
///
/// Delay before attempt `n` (0-based retry count) is
/// `base_delay * factor^n`, so the defaults wait 1 s → 2 s → 4 s → 8 s.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Default: 5.
    pub max_attempts: u32,
    /// Delay before the first retry. Default: 1 s.
    pub base_delay: Duration,
    /// Multiplier applied per retry. Default: 2.0.
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.mul_f64(self.factor.powi(retry as i32))
    }
}

/// Injectable sleep, so tests can record delays instead of waiting them.
pub trait Sleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// The production sleeper.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `op` under the policy, retrying only errors `is_retryable` accepts.
///
/// Returns the first non-retryable error immediately, or the last error
/// once attempts are exhausted.
pub async fn run_with_backoff<T, E, F, Fut, S>(
    policy: &RetryPolicy,
    sleeper: &S,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: Sleeper,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut retry = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retry + 1 < attempts && is_retryable(&e) => {
                let delay = policy.delay_for(retry);
                warn!(
                    "upstream call rate-limited (attempt {}/{}), backing off {:?}: {e}",
                    retry + 1,
                    attempts,
                    delay
                );
                sleeper.sleep(delay).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
