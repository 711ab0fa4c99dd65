//! HTTP client settings and retry logic.
//!
//! Shared by the SoftLayer REST transport and the registry client. Retries here cover a
//! single HTTP exchange; waiting for remote state to change is the job of [`crate::poll`].

use std::time::Duration;

/// Timeout for one SoftLayer API request, in seconds. Ordering calls are slow.
pub const SOFTLAYER_API_DEFAULT_TIMEOUT: u64 = 120;

/// Timeout for one registry request, in seconds
pub const REGISTRY_DEFAULT_TIMEOUT: u64 = 30;

/// Connect timeout, in seconds
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

/// Idle timeout for pooled connections, in seconds
pub const DEFAULT_POOL_IDLE_TIMEOUT: u64 = 90;

/// Idle connections kept per host
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 4;

/// Retries of a failed exchange before giving up
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First retry delay in milliseconds; later delays double
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Cap on the retry delay in milliseconds
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 8000;

/// Doubling backoff for retrying one HTTP exchange.
///
/// Only throttling, gateway errors and connection failures are retried; SoftLayer exceptions
/// are answers, not failures of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Longest delay between retries
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the default retry count and delays.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }

    /// Set the number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the first retry delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (1-based); zero for the first attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1_u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether an HTTP status means the exchange itself failed and is worth another attempt.
    ///
    /// A plain 500 is not included: SoftLayer reports its exceptions with it.
    #[must_use]
    pub const fn retries_status(status: u16) -> bool {
        matches!(status, 429 | 502 | 503 | 504)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings of a `reqwest` client talking to SoftLayer or the registry.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Whole request timeout
    pub timeout: Duration,

    /// Retries of one exchange
    pub retry_policy: RetryPolicy,

    /// Pooled connection idle timeout
    pub pool_idle_timeout: Duration,

    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,

    /// Accept gzip responses
    pub enable_compression: bool,
}

impl ClientConfig {
    /// Settings for the SoftLayer API.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: Duration::from_secs(SOFTLAYER_API_DEFAULT_TIMEOUT),
            retry_policy: RetryPolicy::new(),
            pool_idle_timeout: Duration::from_secs(DEFAULT_POOL_IDLE_TIMEOUT),
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            enable_compression: true,
        }
    }

    /// Settings for the registry: a shorter timeout and no compression.
    #[must_use]
    pub const fn registry() -> Self {
        Self {
            timeout: Duration::from_secs(REGISTRY_DEFAULT_TIMEOUT),
            enable_compression: false,
            ..Self::new()
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
