//! Fixed-cadence polling with a single wall-clock deadline.
//!
//! The device tool answers in roughly constant time, so there is no backoff: the
//! attempt runs, and if it did not succeed the poller sleeps `interval` and tries
//! again, until the deadline taken at call time has passed. An attempt still
//! pending at the deadline is dropped and counts as a failure.

use std::future::Future;
use std::time::Duration;
use tokio::time::{self, sleep, Instant};

/// Retry `attempt` until it yields `Some(value)` or `timeout` elapses.
///
/// With an attempt that never succeeds the call returns `None` no earlier than
/// `timeout` and no later than `timeout + interval`, however long a single attempt
/// would have taken.
pub async fn poll_for<T, F, Fut>(mut attempt: F, interval: Duration, timeout: Duration) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match time::timeout(remaining, attempt()).await {
            Ok(Some(value)) => {
                log::trace!("[Poll] succeeded after {} attempt(s)", attempts);
                return Some(value);
            }
            Ok(None) => {}
            Err(_) => log::trace!("[Poll] attempt {} cut off at the deadline", attempts),
        }
        if Instant::now() >= deadline {
            log::trace!("[Poll] deadline reached after {} attempt(s)", attempts);
            return None;
        }
        sleep(interval).await;
    }
}

/// Retry `predicate` until it returns `true` or `timeout` elapses.
pub async fn poll_until<F, Fut>(mut predicate: F, interval: Duration, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_for(
        || {
            let check = predicate();
            async move { check.await.then_some(()) }
        },
        interval,
        timeout,
    )
    .await
    .is_some()
}
