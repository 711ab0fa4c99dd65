//! Bounded polling.
//!
//! Every wait in the CPI is a "query, check, sleep" loop against a deadline. [`poll_until`]
//! is that loop written once: the caller supplies a probe that reports whether the awaited
//! condition holds, and the helper handles sleeping, deadlines and transient query failures.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// The condition holds; stop polling with this value.
    Ready(T),
    /// Not there yet; sleep and probe again.
    Pending,
}

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Upper bound on the sleep between probes
    pub interval: Duration,
    /// Consecutive transient probe failures tolerated before giving up
    pub transient_retries: u32,
}

impl PollPolicy {
    /// Create a policy with the given interval and transient retry budget.
    #[must_use]
    pub const fn new(interval: Duration, transient_retries: u32) -> Self {
        Self {
            interval,
            transient_retries,
        }
    }

    /// Same policy with a different interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 3)
    }
}

/// The deadline `timeout` from now.
#[must_use]
pub fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout
}

/// Probe until it reports [`Probe::Ready`] or `until` passes.
///
/// Sleeps `min(policy.interval, until - now)` between probes. Transient probe errors
/// (see [`Error::is_transient`]) are retried up to `policy.transient_retries` consecutive
/// times; any other error is returned immediately.
///
/// # Errors
///
/// Returns [`Error::Timeout`] naming `what` when the deadline passes, or the probe's error.
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    until: Instant,
    what: &str,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    let mut failures = 0u32;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match probe().await {
            Ok(Probe::Ready(value)) => return Ok(value),
            Ok(Probe::Pending) => failures = 0,
            Err(err) if err.is_transient() && failures < policy.transient_retries => {
                failures += 1;
                debug!(what, attempt, failures, error = %err, "Transient failure while polling");
            }
            Err(err) => return Err(err),
        }

        let now = Instant::now();
        if now >= until {
            return Err(Error::Timeout(what.to_string()));
        }

        let delay = std::cmp::min(policy.interval, until - now);
        debug!(what, attempt, "Polling again after {:?}", delay);
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_secs(5), 2)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_pending() {
        let calls = Cell::new(0);
        let start = Instant::now();

        let value = poll_until(policy(), deadline_after(Duration::from_secs(60)), "thing", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 4 {
                    Ok(Probe::Pending)
                } else {
                    Ok(Probe::Ready(n))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 4);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let err = poll_until(
            policy(),
            deadline_after(Duration::from_secs(12)),
            "instance 9 to become ready",
            || async { Ok::<_, Error>(Probe::<()>::Pending) },
        )
        .await
        .unwrap_err();

        assert_eq!(err, Error::Timeout("instance 9 to become ready".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_sleep_is_capped_by_deadline() {
        let start = Instant::now();
        let _ = poll_until(
            PollPolicy::new(Duration::from_secs(10), 0),
            deadline_after(Duration::from_secs(13)),
            "capped",
            || async { Ok::<_, Error>(Probe::<()>::Pending) },
        )
        .await;

        // 10s sleep, then the remaining 3s.
        assert_eq!(start.elapsed(), Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried() {
        let calls = Cell::new(0);
        let value = poll_until(policy(), deadline_after(Duration::from_secs(60)), "x", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n <= 2 {
                    Err(Error::ServiceUnavailable("503".to_string()))
                } else {
                    Ok(Probe::Ready("done"))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_budget_exhausted() {
        let calls = Cell::new(0);
        let err = poll_until(policy(), deadline_after(Duration::from_secs(60)), "x", || {
            calls.set(calls.get() + 1);
            async { Err::<Probe<()>, _>(Error::HttpError("reset".to_string())) }
        })
        .await
        .unwrap_err();

        assert_eq!(err, Error::HttpError("reset".to_string()));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_propagates() {
        let err = poll_until(policy(), deadline_after(Duration::from_secs(60)), "x", || async {
            Err::<Probe<()>, _>(Error::NotFound("vm".to_string()))
        })
        .await
        .unwrap_err();

        assert!(err.is_not_found());
    }
}
