//! Bounded polling
//!
//! Every wait in the crate goes through [`poll_until`]: evaluate a probe, sleep a fixed
//! interval, repeat until the probe reports ready or the deadline passes. The first probe
//! runs immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Outcome of a single probe evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// The condition holds; polling stops with this value
    Ready(T),
    /// The condition does not hold yet; the description is kept as the last observation
    Pending(String),
}

/// Poll `probe` every `interval` until it is ready or `deadline` has elapsed.
///
/// A probe returning `Err` stops polling immediately and the error is propagated as-is.
/// Each probe only gets the time left before the deadline, so a hung call cannot stretch
/// the wait. On expiry the result is an [`E2eError::Timeout`] carrying the last observation.
/// A zero `interval` is rejected with [`E2eError::InvalidQuery`].
pub async fn poll_until<T, F, Fut>(
    what: &str,
    interval: Duration,
    deadline: Duration,
    mut probe: F,
) -> E2eResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<Probe<T>>>,
{
    if interval.is_zero() {
        return Err(E2eError::invalid_query(format!(
            "poll interval for {} must be positive",
            what
        )));
    }

    let start = Instant::now();
    let mut attempt: u32 = 0;
    let mut last_observed = String::from("no observation");

    loop {
        attempt += 1;

        let remaining = deadline.saturating_sub(start.elapsed());
        let Ok(outcome) = timeout(remaining, probe()).await else {
            debug!(what, attempt, "Check still running at the deadline");
            return Err(E2eError::timeout(what, deadline, last_observed));
        };

        match outcome? {
            Probe::Ready(value) => {
                debug!(what, attempt, elapsed = ?start.elapsed(), "Condition met");
                return Ok(value);
            }
            Probe::Pending(observed) => {
                debug!(what, attempt, %observed, "Condition not met yet");
                last_observed = observed;
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= deadline {
            return Err(E2eError::timeout(what, deadline, last_observed));
        }

        sleep(interval.min(deadline - elapsed)).await;
    }
}
