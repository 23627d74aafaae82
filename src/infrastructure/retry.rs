//! Uniform backoff wrapper for fallible I/O.
//!
//! Every outbound HTTP call and store operation funnels through
//! [`Retryer::run`]: up to `max_attempts` tries with exponential backoff
//! (`base × 2^(i-1)` before attempt i+1), a server Retry-After hint taking
//! precedence over the computed delay, and a hard cap on any single wait.
//! The cancellation signal is observed before every attempt and during every
//! wait.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{EtlError, EtlResult};
use crate::infrastructure::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct Retryer {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Retryer {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_secs(config.retry_backoff_seconds),
            Duration::from_secs(config.max_backoff_seconds),
        )
    }

    /// Execute `attempt` until it succeeds, fails fatally, runs out of
    /// attempts, or the cancellation signal fires.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> EtlResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EtlResult<T>>,
    {
        for i in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                warn!("🛑 {label}: cancelled before attempt {i}");
                return Err(EtlError::Cancelled);
            }

            match attempt().await {
                Ok(value) => {
                    if i > 1 {
                        debug!("{label}: succeeded on attempt {i}");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && i < self.max_attempts => {
                    let delay = self.delay_for(i, err.retry_after());
                    warn!(
                        "{label}: attempt {i}/{} failed ({err}), retrying in {:?}",
                        self.max_attempts, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            warn!("🛑 {label}: cancelled during backoff wait");
                            return Err(EtlError::Cancelled);
                        }
                    }
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(
                            "{label}: giving up after {} attempts: {err}",
                            self.max_attempts
                        );
                    }
                    return Err(err);
                }
            }
        }
        unreachable!("retry loop always returns from its last attempt")
    }

    /// Delay before the attempt following failed attempt `i`.
    fn delay_for(&self, i: u32, hint: Option<Duration>) -> Duration {
        let computed = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(i.saturating_sub(1)));
        hint.unwrap_or(computed).min(self.max_delay)
    }
}
