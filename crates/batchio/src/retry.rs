//! Classified retry with exponential backoff.
//!
//! Whether an error is worth retrying is the caller's call ([`Classify`]);
//! how long to wait is shared ([`ExponentialBackoff`]). An operation is
//! re-run until it succeeds, its error is classified permanent, the backoff
//! budget runs out, or the token is cancelled while waiting.
//!
//! Retried operations must tolerate running more than once.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{millis, opt_millis};

/// Backoff schedule parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First wait before randomization.
    #[serde(rename = "initial_interval_ms", with = "millis")]
    pub initial_interval: Duration,
    /// Upper bound on the un-randomized interval.
    #[serde(rename = "max_interval_ms", with = "millis")]
    pub max_interval: Duration,
    /// Wall-clock budget from the first attempt. `None` retries indefinitely.
    #[serde(rename = "max_elapsed_ms", with = "opt_millis")]
    pub max_elapsed: Option<Duration>,
    pub multiplier: f64,
    /// Each wait is drawn uniformly from `interval * (1 ± randomization_factor)`.
    pub randomization_factor: f64,
    /// Optional cap on retries (attempts after the first).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            max_elapsed: Some(Duration::from_secs(15 * 60)),
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_retries: None,
        }
    }
}

/// Stateful exponential backoff schedule.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
    started: Instant,
    retries: u32,
}

impl ExponentialBackoff {
    /// Out-of-range parameters are clamped: the factor to `[0, 1]`, the
    /// multiplier to at least 1, and the initial interval to the max interval.
    pub fn new(config: BackoffConfig) -> Self {
        let config = clamp(config);
        Self {
            current: config.initial_interval,
            config,
            started: Instant::now(),
            retries: 0,
        }
    }

    /// Restart the schedule and the elapsed clock.
    pub fn reset(&mut self) {
        self.current = self.config.initial_interval;
        self.started = Instant::now();
        self.retries = 0;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Next wait, or `None` when the retry or elapsed budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_retries
            && self.retries >= max
        {
            return None;
        }

        let next = randomize(self.current, self.config.randomization_factor);
        self.current = self.grow();

        if let Some(budget) = self.config.max_elapsed
            && self.elapsed() + next > budget
        {
            return None;
        }

        self.retries += 1;
        Some(next)
    }

    fn grow(&self) -> Duration {
        let max = self.config.max_interval.as_secs_f64();
        let grown = self.current.as_secs_f64() * self.config.multiplier;
        Duration::from_secs_f64(grown.min(max).max(0.0))
    }
}

fn clamp(mut config: BackoffConfig) -> BackoffConfig {
    let factor = config.randomization_factor;
    config.randomization_factor = if factor.is_nan() { 0.0 } else { factor.clamp(0.0, 1.0) };

    let multiplier = config.multiplier;
    config.multiplier = if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 };

    config.initial_interval = config.initial_interval.min(config.max_interval);
    config
}

fn randomize(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return interval;
    }
    let secs = interval.as_secs_f64();
    let delta = secs * factor;
    let low = (secs - delta).max(0.0);
    let high = secs + delta;
    Duration::from_secs_f64(low + rand::random::<f64>() * (high - low))
}

/// Verdict on a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Worth another attempt; the message is logged with the retry.
    Retryable(String),
    /// Retrying cannot help; surface the error as-is.
    Permanent,
}

/// Maps an operation's error to a [`Classification`].
pub trait Classify<E> {
    fn classify(&self, error: &E) -> Classification;
}

impl<E, F> Classify<E> for F
where
    F: Fn(&E) -> Classification,
{
    fn classify(&self, error: &E) -> Classification {
        self(error)
    }
}

/// Treats every error as retryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E: std::fmt::Display> Classify<E> for AlwaysRetry {
    fn classify(&self, error: &E) -> Classification {
        Classification::Retryable(error.to_string())
    }
}

/// Treats every error as permanent (single attempt).
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl<E> Classify<E> for NeverRetry {
    fn classify(&self, _error: &E) -> Classification {
        Classification::Permanent
    }
}

/// Backoff schedule plus the classifier for one call site.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy<C> {
    pub backoff: BackoffConfig,
    pub classifier: C,
}

impl<C> RetryPolicy<C> {
    pub fn new(backoff: BackoffConfig, classifier: C) -> Self {
        Self {
            backoff,
            classifier,
        }
    }

    /// Same schedule, different classifier.
    pub fn with_classifier<D>(&self, classifier: D) -> RetryPolicy<D> {
        RetryPolicy {
            backoff: self.backoff.clone(),
            classifier,
        }
    }
}

/// Failure of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation's own error: permanent, or the last one seen when the
    /// budget ran out.
    #[error(transparent)]
    Failed(E),
    /// The token was cancelled while waiting between attempts.
    #[error("operation cancelled while waiting to retry")]
    Cancelled,
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn inner(&self) -> Option<&E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Cancelled => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Cancelled => None,
        }
    }
}

/// Run `operation` until success, a permanent error, budget exhaustion, or cancellation.
///
/// The token is only observed during backoff sleeps; an attempt in flight is
/// never interrupted.
pub async fn retry<T, E, C, F, Fut>(
    token: &CancellationToken,
    policy: &RetryPolicy<C>,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    C: Classify<E>,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = ExponentialBackoff::new(policy.backoff.clone());
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let reason = match policy.classifier.classify(&error) {
            Classification::Retryable(reason) => reason,
            Classification::Permanent => {
                tracing::debug!(attempt, "Permanent failure, not retrying");
                return Err(RetryError::Failed(error));
            }
        };

        let Some(delay) = backoff.next_backoff() else {
            tracing::warn!(
                attempt,
                elapsed_ms = backoff.elapsed().as_millis() as u64,
                reason = %reason,
                "Retry budget exhausted"
            );
            return Err(RetryError::Failed(error));
        };

        tracing::warn!(
            attempt,
            backoff_ms = delay.as_millis() as u64,
            reason = %reason,
            "Retryable failure, backing off"
        );

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(attempt, "Retry cancelled during backoff");
                return Err(RetryError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
