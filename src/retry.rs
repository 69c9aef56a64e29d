//! Exponential backoff around fallible async calls.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How often, and how patiently, a provider call is repeated.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 behaves like 1
    pub max_attempts: u32,
    /// Pause after the first failure
    pub initial_delay: Duration,
    /// Ceiling for any pause
    pub max_delay: Duration,
    /// Growth factor between consecutive pauses
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: initial_delay.saturating_mul(8),
            backoff_multiplier: 2.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Three attempts with 4s then 8s pauses, never more than 10s.
    pub fn provider_call() -> Self {
        Self::new(3, Duration::from_secs(4)).with_max_delay(Duration::from_secs(10))
    }

    /// Retries back to back. Meant for tests and local providers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO).with_max_delay(Duration::ZERO)
    }

    /// Pause taken after `failures` consecutive failures.
    pub fn backoff_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.powi(failures as i32 - 1);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::provider_call()
    }
}

/// Run `call` until it succeeds, `retryable` rejects the error, or the
/// attempt budget is spent. The last error is returned.
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    mut call: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let budget = policy.attempts();
    let mut failures = 0;

    loop {
        let error = match call().await {
            Ok(value) => {
                if failures > 0 {
                    debug!("{} recovered after {} failed attempts", label, failures);
                }
                return Ok(value);
            }
            Err(error) => error,
        };
        failures += 1;

        if !retryable(&error) {
            debug!("{} failed permanently: {}", label, error);
            return Err(error);
        }
        if failures >= budget {
            warn!("{} gave up after {} attempts: {}", label, budget, error);
            return Err(error);
        }

        let pause = policy.backoff_after(failures);
        debug!(
            "{} attempt {}/{} failed ({}), retrying in {:?}",
            label, failures, budget, error, pause
        );
        if !pause.is_zero() {
            sleep(pause).await;
        }
    }
}
