//! Per-asset retry policy for market data fetches.

use std::time::Duration;

use crate::data_source::{SourceError, SourceErrorKind};

/// Wait between two attempts at fetching the same asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed { delay: Duration },
    /// `base * factor^retry`, capped at `max`, optionally spread by up to
    /// half of itself in either direction so concurrent assets do not retry
    /// in lockstep against a rate-limited upstream.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let nominal = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let spread = if jitter { 0.5 + fastrand::f64() } else { 1.0 };
                Duration::from_secs_f64((nominal * spread).max(0.0))
            }
        }
    }
}

/// Configuration for the automatic retry mechanism.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Enables or disables the retry mechanism.
    pub enabled: bool,
    /// The maximum number of retries to attempt.
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// The backoff strategy to use between retries.
    pub backoff: Backoff,
    /// Whether to retry when an attempt exceeds its timeout.
    pub retry_on_timeout: bool,
    /// Whether to retry when the upstream reports rate limiting.
    pub retry_on_rate_limit: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            backoff: Backoff::default(),
            retry_on_timeout: true,
            retry_on_rate_limit: true,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with `max_retries` retries.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Fixed backoff with `max_retries` retries.
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total number of attempts, including the first one.
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Whether `error` is transient under this configuration.
    pub fn should_retry(&self, error: &SourceError) -> bool {
        if !self.enabled || !error.retryable() {
            return false;
        }
        match error.kind() {
            SourceErrorKind::Timeout => self.retry_on_timeout,
            SourceErrorKind::RateLimited => self.retry_on_rate_limit,
            _ => true,
        }
    }

    /// Calculate the delay for a given retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}
