//! Retry policy shared by generative calls and conversion runs
//!
//! One policy object `{max_attempts, backoff schedule, retryable predicate}`
//! instead of hand-written loops at each call site.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f32,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay_ms: 500,
            max_delay_ms: 8_000,
            factor: 2.0,
            jitter: true,
        }
    }
}

/// A partially written policy table; unset fields keep the section's own
/// defaults instead of [`RetryPolicy::default`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverrides {
    pub max_attempts: Option<usize>,
    pub min_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub factor: Option<f32>,
    pub jitter: Option<bool>,
}

impl RetryOverrides {
    pub fn apply(self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            min_delay_ms: self.min_delay_ms.unwrap_or(base.min_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(base.max_delay_ms),
            factor: self.factor.unwrap_or(base.factor),
            jitter: self.jitter.unwrap_or(base.jitter),
        }
    }
}

/// The last error once the policy gave up
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay_ms: min_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            ..Self::default()
        }
    }

    /// Immediate retries, no sleeping; handy for tests
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            min_delay_ms: 0,
            max_delay_ms: 0,
            factor: 1.0,
            jitter: false,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(format!("{}.max_attempts must be at least 1", name)));
        }
        if self.factor < 1.0 {
            return Err(ConfigError::Invalid(format!("{}.factor must be >= 1.0", name)));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "{}.min_delay_ms exceeds max_delay_ms",
                name
            )));
        }
        Ok(())
    }

    fn builder(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_factor(self.factor)
            .with_max_times(self.max_attempts.saturating_sub(1));
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Delays between attempts, ignoring jitter
    pub fn schedule(&self) -> Vec<Duration> {
        self.clone().without_jitter().builder().build().collect()
    }

    /// Run `operation` until it succeeds, `retryable` rejects the error, or
    /// attempts run out
    pub async fn run<T, E, F, Fut, P>(
        &self,
        label: &str,
        operation: F,
        retryable: P,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: std::fmt::Display,
    {
        self.run_with_hint(label, operation, retryable, |_| None).await
    }

    /// Like [`run`](Self::run), but an error may name the least time to wait
    /// before the next attempt (a server's `Retry-After`). The longer of the
    /// hint and the backoff delay is used.
    pub async fn run_with_hint<T, E, F, Fut, P, H>(
        &self,
        label: &str,
        mut operation: F,
        retryable: P,
        mut hint: H,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        H: FnMut(&E) -> Option<Duration>,
        E: std::fmt::Display,
    {
        let attempts = AtomicUsize::new(0);
        // Wait owed by the next attempt on top of the backoff delay, in ms
        let owed_ms = AtomicU64::new(0);

        let result = (|| {
            attempts.fetch_add(1, Ordering::Relaxed);
            let owed = Duration::from_millis(owed_ms.swap(0, Ordering::Relaxed));
            let attempt = operation();
            async move {
                if !owed.is_zero() {
                    tokio::time::sleep(owed).await;
                }
                attempt.await
            }
        })
        .retry(self.builder())
        .when(retryable)
        .notify(|err: &E, dur: Duration| {
            let extra = hint(err).map_or(Duration::ZERO, |least| least.saturating_sub(dur));
            owed_ms.store(extra.as_millis() as u64, Ordering::Relaxed);
            tracing::warn!(
                "[RETRY] {} failed (attempt {}), retrying after {:.2}s: {}",
                label,
                attempts.load(Ordering::Relaxed),
                (dur + extra).as_secs_f64(),
                err
            );
        })
        .await;

        result.map_err(|error| Exhausted {
            error,
            attempts: attempts.load(Ordering::Relaxed),
        })
    }
}
