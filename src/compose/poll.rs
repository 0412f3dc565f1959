//! Timeout-bounded polling
//!
//! Asynchronous remote work (node assembly, startup) is awaited by probing
//! at a fixed interval until it settles or the deadline passes. Exceeding
//! the deadline is an error; there is no unbounded wait.

use crate::error::{Error, Result};
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Ready(T),
    Pending,
}

/// Fixed-interval polling with an upper bound on elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Probe until it reports `Ready`, fails, or the timeout elapses.
    ///
    /// Probe errors end the poll immediately.
    pub async fn poll_until<T, F, Fut>(&self, operation: &str, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollStatus<T>>>,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.interval)
            .with_max_interval(self.interval)
            .with_multiplier(1.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(Some(self.timeout))
            .build();

        let timeout = self.timeout;
        let mut attempts: u32 = 0;
        backoff::future::retry(policy, || {
            attempts += 1;
            let attempt = attempts;
            let fut = probe();
            async move {
                match fut.await {
                    Ok(PollStatus::Ready(value)) => Ok(value),
                    Ok(PollStatus::Pending) => {
                        debug!("{} still pending after {} probe(s)", operation, attempt);
                        Err(backoff::Error::transient(Error::Timeout {
                            operation: operation.to_string(),
                            waited: timeout,
                        }))
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            }
        })
        .await
    }
}
