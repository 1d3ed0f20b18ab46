//! Backoff for host-driven lifecycle events.
//!
//! Install and activate may fail (a precache URL is down, the store is
//! locked). The worker reports the failure; the host decides whether to
//! dispatch the event again. This module is that host policy.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::sleep;
use tracing::{debug, warn};

/// How often, and how patiently, to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first. Never below 1.
    pub max_attempts: u32,
    /// Pause before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single pause.
    pub max_delay: Duration,
    /// Growth factor applied per further attempt.
    pub backoff_multiplier: f64,
    /// Stretch each pause by up to a quarter.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt.
    pub fn none() -> Self {
        Self::with_attempts(1)
    }

    /// Default pacing with `max_attempts` attempts (at least one).
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Pause before `attempt` (1-based). The first attempt never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(retries) = attempt.checked_sub(2) else {
            return Duration::ZERO;
        };

        let grown = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(retries as i32);
        let capped = Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()));

        if !self.jitter {
            return capped;
        }
        capped.mul_f64(1.0 + clock_fraction() / 4.0)
    }
}

/// A value in `0.0..=1.0` derived from the sub-second clock.
fn clock_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos) / 1_000_000_000.0
}

/// Run `operation` until it succeeds or `config.max_attempts` is spent.
///
/// The closure receives the 1-based attempt number. `label` names the
/// lifecycle event in log output. The error of the final attempt is
/// returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let budget = config.max_attempts.max(1);

    for attempt in 1..budget {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let delay = config.delay_for_attempt(attempt + 1);
                warn!(event = label, attempt, budget, error = %e, ?delay, "Lifecycle event failed, retrying");
                sleep(delay).await;
            }
        }
    }

    match operation(budget).await {
        Ok(value) => {
            if budget > 1 {
                debug!(event = label, attempt = budget, "Succeeded on last attempt");
            }
            Ok(value)
        }
        Err(e) => {
            warn!(event = label, attempts = budget, error = %e, "Giving up");
            Err(e)
        }
    }
}
