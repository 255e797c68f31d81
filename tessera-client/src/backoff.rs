//! Cancellable backoff controller.
//!
//! A `Backoffer` lives for exactly one logical request. Every retry the
//! request makes charges one attempt against a named class; the request
//! fails permanently once a class runs out of attempts, the total sleep
//! budget is spent, the deadline passes, or the caller cancels.
//!
//! # Sleep computation
//!
//! The nth backoff of a class sleeps `min(cap, base * 2^n)`, randomized
//! by the class's [`Jitter`] mode.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{BackoffConfig, BackoffPolicy, Jitter};

/// Maximum number of charged errors remembered for the final report.
pub const BACKOFF_ERRORS_MAX: usize = 16;

/// Failure classes with independent retry budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackoffKind {
    /// The transport call failed.
    Rpc,
    /// The server reported it is not the leader and did not know who is.
    RegionMiss,
    /// The server is overloaded.
    ServerBusy,
}

impl BackoffKind {
    /// All classes.
    pub const ALL: [Self; 3] = [Self::Rpc, Self::RegionMiss, Self::ServerBusy];

    /// Returns the class name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::RegionMiss => "region_miss",
            Self::ServerBusy => "server_busy",
        }
    }
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a backoff failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackoffError {
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The request's deadline passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// A retry budget ran out.
    #[error("{kind} backoff exhausted after {attempts} attempts ({total_sleep_ms}ms slept), errors: {errors:?}")]
    Exhausted {
        /// The class that ran out.
        kind: BackoffKind,
        /// Attempts charged to that class, including the failing one.
        attempts: u32,
        /// Total time slept across all classes.
        total_sleep_ms: u64,
        /// The most recent errors charged, oldest first.
        errors: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct ClassState {
    attempts: u32,
    last_sleep: Duration,
}

/// Per-request backoff controller.
///
/// Owned by one logical request for its whole lifetime and lent to each
/// sender call made on its behalf. Budgets accumulate across every retry of
/// that request and are never reset; start a new request with a new one.
#[derive(Debug)]
pub struct Backoffer {
    config: BackoffConfig,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    classes: HashMap<BackoffKind, ClassState>,
    total_sleep: Duration,
    errors: Vec<String>,
}

impl Backoffer {
    /// Creates a backoffer observing `cancel`.
    #[must_use]
    pub fn new(config: BackoffConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            cancel,
            deadline: None,
            classes: HashMap::new(),
            total_sleep: Duration::ZERO,
            errors: Vec::new(),
        }
    }

    /// Creates a backoffer that can never be cancelled from outside.
    #[must_use]
    pub fn uncancellable(config: BackoffConfig) -> Self {
        Self::new(config, CancellationToken::new())
    }

    /// Sets an absolute deadline for the request.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns the cancellation token observed by this backoffer.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Returns how many times `kind` has been charged.
    #[must_use]
    pub fn attempts(&self, kind: BackoffKind) -> u32 {
        self.classes.get(&kind).map_or(0, |c| c.attempts)
    }

    /// Returns the total time slept so far.
    #[must_use]
    pub const fn total_sleep(&self) -> Duration {
        self.total_sleep
    }

    /// Returns the most recent errors charged, oldest first.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Fails if the request was cancelled or its deadline has passed.
    ///
    /// # Errors
    /// Returns `Cancelled` or `DeadlineExceeded`.
    pub fn check_live(&self) -> Result<(), BackoffError> {
        if self.cancel.is_cancelled() {
            return Err(BackoffError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(BackoffError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Charges one attempt to `kind` and sleeps before the next retry.
    ///
    /// The sleep is interrupted by cancellation and by the deadline.
    ///
    /// # Errors
    /// Returns `Exhausted` if the class or the total budget ran out, or
    /// `Cancelled`/`DeadlineExceeded` if the request ended first.
    pub async fn backoff(
        &mut self,
        kind: BackoffKind,
        err: impl fmt::Display + Send,
    ) -> Result<(), BackoffError> {
        self.check_live()?;

        if self.errors.len() >= BACKOFF_ERRORS_MAX {
            self.errors.remove(0);
        }
        self.errors.push(format!("{kind}: {err}"));

        let policy = *self.config.policy(kind);
        let state = self.classes.entry(kind).or_default();
        state.attempts += 1;
        let attempts = state.attempts;
        if attempts > policy.max_attempts {
            return Err(self.exhausted(kind, attempts));
        }

        let sleep = next_sleep(&policy, attempts - 1, state.last_sleep, &mut rand::thread_rng());
        state.last_sleep = sleep;
        if self.total_sleep + sleep > self.config.max_sleep {
            return Err(self.exhausted(kind, attempts));
        }

        debug!(
            kind = %kind,
            attempt = attempts,
            sleep = ?sleep,
            "backing off"
        );
        self.sleep(sleep).await?;
        self.total_sleep += sleep;
        Ok(())
    }

    async fn sleep(&self, duration: Duration) -> Result<(), BackoffError> {
        let wake = Instant::now() + duration;
        match self.deadline {
            Some(deadline) if deadline <= wake => {
                tokio::select! {
                    () = self.cancel.cancelled() => Err(BackoffError::Cancelled),
                    () = tokio::time::sleep_until(deadline) => Err(BackoffError::DeadlineExceeded),
                }
            }
            _ => {
                tokio::select! {
                    () = self.cancel.cancelled() => Err(BackoffError::Cancelled),
                    () = tokio::time::sleep_until(wake) => Ok(()),
                }
            }
        }
    }

    fn exhausted(&self, kind: BackoffKind, attempts: u32) -> BackoffError {
        BackoffError::Exhausted {
            kind,
            attempts,
            total_sleep_ms: self.total_sleep.as_millis() as u64,
            errors: self.errors.clone(),
        }
    }
}

/// Computes the sleep before the retry following the `n`th backoff
/// (zero-based) of a class.
///
/// Works in microseconds so sub-millisecond policies still sleep.
fn next_sleep(policy: &BackoffPolicy, n: u32, last_sleep: Duration, rng: &mut impl Rng) -> Duration {
    let base_us = micros(policy.base);
    let cap_us = micros(policy.cap);
    let expo_us = base_us.saturating_mul(1_u64.checked_shl(n).unwrap_or(u64::MAX)).min(cap_us);

    let sleep_us = match policy.jitter {
        Jitter::None => expo_us,
        Jitter::Full => random_below(rng, expo_us),
        Jitter::Equal => expo_us / 2 + random_below(rng, expo_us / 2),
        Jitter::Decorrelated => {
            let last_us = micros(last_sleep).max(base_us);
            let spread = last_us.saturating_mul(3).saturating_sub(base_us);
            (base_us + random_below(rng, spread)).min(cap_us)
        }
    };
    Duration::from_micros(sleep_us)
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

fn random_below(rng: &mut impl Rng, bound: u64) -> u64 {
    if bound == 0 {
        0
    } else {
        rng.gen_range(0..bound)
    }
}
