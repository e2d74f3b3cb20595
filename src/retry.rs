//! Bounded sleep-and-retry for the pipeline's polling points.
//!
//! Every wait in the pipeline (SSH reachability, cloud-init completion,
//! guest boot, apt lock contention) goes through this one combinator, so
//! no retry is ever unbounded.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

/// Run `op` until it succeeds or the attempt ceiling is reached.
///
/// Fixed delay between attempts, no backoff growth. The last error is
/// returned with the attempt budget attached once exhausted.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    anyhow::ensure!(policy.max_attempts > 0, "retry budget for {} is zero", what);

    let mut last_err = None;
    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "attempt failed"
                );
                last_err = Some(e);
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }

    // max_attempts > 0 guarantees at least one recorded error
    Err(last_err
        .unwrap_or_else(|| anyhow::anyhow!("{} failed", what))
        .context(format!(
            "{} did not succeed within {} attempts",
            what, policy.max_attempts
        )))
}
