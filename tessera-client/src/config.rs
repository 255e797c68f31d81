//! Client configuration.
//!
//! Backoff policies per failure class and default request timeouts.

use std::time::Duration;

use crate::backoff::BackoffKind;

/// Timeout for short reads (point gets, lock resolution).
pub const READ_TIMEOUT_SHORT: Duration = Duration::from_secs(20);

/// Timeout for medium reads (scans, batch gets).
pub const READ_TIMEOUT_MEDIUM: Duration = Duration::from_secs(60);

/// Timeout for long-running requests (coprocessor, GC).
pub const READ_TIMEOUT_LONG: Duration = Duration::from_secs(150);

/// Total backoff budget for point reads.
pub const GET_MAX_BACKOFF: Duration = Duration::from_secs(20);

/// Total backoff budget for coprocessor streaming.
pub const COP_NEXT_MAX_BACKOFF: Duration = Duration::from_secs(20);

/// Total backoff budget for commits, which must try harder than reads.
pub const COMMIT_MAX_BACKOFF: Duration = Duration::from_secs(41);

/// How the computed exponential sleep is randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Sleep exactly the exponential value.
    None,
    /// Sleep a uniform random value in `[0, v)`.
    Full,
    /// Sleep `v / 2` plus a uniform random value in `[0, v / 2)`.
    Equal,
    /// Sleep based on the previous sleep rather than the attempt count.
    Decorrelated,
}

/// Backoff policy for one failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Sleep before the first retry.
    pub base: Duration,
    /// Upper bound on any single sleep.
    pub cap: Duration,
    /// Randomization mode.
    pub jitter: Jitter,
    /// Number of backoffs allowed before giving up.
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Creates a new policy.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration, jitter: Jitter, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            jitter,
            max_attempts,
        }
    }

    /// Validates the policy.
    ///
    /// # Errors
    /// Returns an error if the policy is invalid.
    pub fn validate(&self, kind: BackoffKind) -> Result<(), ConfigError> {
        if self.base > self.cap {
            return Err(ConfigError::InvalidBackoff {
                kind,
                message: "base must be <= cap".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidBackoff {
                kind,
                message: "max_attempts must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Backoff configuration for one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Total time the request may spend sleeping across all classes.
    pub max_sleep: Duration,
    /// Policy after a transport failure.
    pub rpc: BackoffPolicy,
    /// Policy after a not-leader error without a leader hint.
    pub region_miss: BackoffPolicy,
    /// Policy after a server-busy error.
    pub server_busy: BackoffPolicy,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::for_get()
    }
}

impl BackoffConfig {
    /// Configuration for point reads.
    #[must_use]
    pub const fn for_get() -> Self {
        Self {
            max_sleep: GET_MAX_BACKOFF,
            rpc: BackoffPolicy::new(
                Duration::from_millis(100),
                Duration::from_secs(2),
                Jitter::Equal,
                10,
            ),
            region_miss: BackoffPolicy::new(
                Duration::from_millis(2),
                Duration::from_millis(500),
                Jitter::None,
                20,
            ),
            server_busy: BackoffPolicy::new(
                Duration::from_secs(2),
                Duration::from_secs(10),
                Jitter::Equal,
                10,
            ),
        }
    }

    /// Configuration for coprocessor requests.
    #[must_use]
    pub const fn for_coprocessor() -> Self {
        Self::for_get().with_max_sleep(COP_NEXT_MAX_BACKOFF)
    }

    /// Configuration for commits.
    #[must_use]
    pub const fn for_commit() -> Self {
        Self::for_get().with_max_sleep(COMMIT_MAX_BACKOFF)
    }

    /// Creates a configuration suitable for testing (tiny deterministic
    /// sleeps, three attempts per class).
    #[must_use]
    pub const fn for_testing() -> Self {
        let policy = BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
            Jitter::None,
            3,
        );
        Self {
            max_sleep: Duration::from_secs(10),
            rpc: policy,
            region_miss: policy,
            server_busy: policy,
        }
    }

    /// Sets the total sleep budget.
    #[must_use]
    pub const fn with_max_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    /// Replaces the policy for one class.
    #[must_use]
    pub const fn with_policy(mut self, kind: BackoffKind, policy: BackoffPolicy) -> Self {
        match kind {
            BackoffKind::Rpc => self.rpc = policy,
            BackoffKind::RegionMiss => self.region_miss = policy,
            BackoffKind::ServerBusy => self.server_busy = policy,
        }
        self
    }

    /// Returns the policy for one class.
    #[must_use]
    pub const fn policy(&self, kind: BackoffKind) -> &BackoffPolicy {
        match kind {
            BackoffKind::Rpc => &self.rpc,
            BackoffKind::RegionMiss => &self.region_miss,
            BackoffKind::ServerBusy => &self.server_busy,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sleep.is_zero() {
            return Err(ConfigError::InvalidBudget {
                message: "max_sleep must be > 0".to_string(),
            });
        }
        for kind in BackoffKind::ALL {
            self.policy(kind).validate(kind)?;
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid policy for a backoff class.
    InvalidBackoff {
        /// The class with the invalid policy.
        kind: BackoffKind,
        /// Error description.
        message: String,
    },
    /// Invalid overall budget.
    InvalidBudget {
        /// Error description.
        message: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBackoff { kind, message } => {
                write!(f, "invalid {kind} backoff: {message}")
            }
            Self::InvalidBudget { message } => write!(f, "invalid backoff budget: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}
