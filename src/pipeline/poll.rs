//! Fixed-interval polling with a wall-clock budget.
//!
//! [`PollPolicy`] separates *when* to stop (terminal predicate, timeout)
//! from *how* to fetch a status (the `fetch` closure), so the same loop
//! serves every job kind.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of running a [`PollPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The predicate accepted this status.
    Terminal(T),
    /// The budget ran out first. `last` is the most recent successful status.
    TimedOut { last: Option<T>, elapsed: Duration },
}

/// When to poll and when to stop.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy<T> {
    pub interval: Duration,
    pub timeout: Duration,
    pub is_terminal: fn(&T) -> bool,
}

impl<T> PollPolicy<T> {
    pub fn new(interval: Duration, timeout: Duration, is_terminal: fn(&T) -> bool) -> Self {
        Self {
            interval,
            timeout,
            is_terminal,
        }
    }

    /// Poll until `fetch` yields a terminal status or the timeout elapses.
    ///
    /// The first request happens one `interval` after the call, matching a job
    /// that was just submitted. A request error is logged and the next tick
    /// retries; errors alone never end the loop early. `on_status` sees every
    /// successful non-terminal status.
    ///
    /// The deadline also bounds each request: a status request still in flight
    /// when the budget runs out is dropped and the run ends in `TimedOut`.
    pub async fn run<F, Fut, E>(
        &self,
        mut fetch: F,
        mut on_status: impl FnMut(&T),
    ) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut last = None;
        let mut attempt = 0u32;

        loop {
            let wake = Instant::now() + self.interval;
            if wake > deadline {
                return PollOutcome::TimedOut {
                    last,
                    elapsed: started.elapsed(),
                };
            }
            tokio::time::sleep_until(wake).await;
            attempt += 1;

            let response = match tokio::time::timeout_at(deadline, fetch()).await {
                Ok(response) => response,
                Err(_) => {
                    debug!("Status request {} still pending at the deadline", attempt);
                    return PollOutcome::TimedOut {
                        last,
                        elapsed: started.elapsed(),
                    };
                }
            };

            match response {
                Ok(status) => {
                    if (self.is_terminal)(&status) {
                        debug!("Terminal status after {} poll(s)", attempt);
                        return PollOutcome::Terminal(status);
                    }
                    on_status(&status);
                    last = Some(status);
                }
                Err(e) => warn!("Status request {} failed, will retry: {}", attempt, e),
            }
        }
    }
}
