//! Bounded exponential backoff for backend startup
//!
//! Only transient failures (`StoreError::is_transient`) are retried. Any other
//! error is permanent and is returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::storage::error::{StorageResult, StoreError};

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_interval: Duration,

    /// Growth factor applied to the delay after each retry
    pub multiplier: f64,

    /// Cap on a single delay
    pub max_interval: Duration,

    /// Give up once this much time has passed since the first attempt
    pub max_elapsed: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(9),
        }
    }
}

impl BackoffPolicy {
    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy runs out
///
/// The error returned after exhausting the elapsed budget is the last
/// transient error seen.
pub async fn with_backoff<T, F, Fut>(policy: BackoffPolicy, mut op: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let started = Instant::now();
    let mut interval = policy.initial_interval;
    let mut attempt = 1u32;

    loop {
        let err: StoreError = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => {
                debug!("attempt {attempt} failed permanently: {err}");
                return Err(err);
            }
            Err(err) => err,
        };

        let elapsed = started.elapsed();
        if elapsed + interval > policy.max_elapsed {
            warn!("giving up after {attempt} attempts in {elapsed:?}: {err}");
            return Err(err);
        }

        warn!("attempt {attempt} failed, retrying in {interval:?}: {err}");
        time::sleep(interval).await;

        interval = policy.next_interval(interval);
        attempt += 1;
    }
}
