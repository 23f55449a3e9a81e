use std::future::Future;
use std::time::Duration;

use log::warn;
use tokio::time::Instant;

use crate::store::{StoreError, StoreResult};

/// Absolute point in time bounding every store call made on behalf of one
/// request. Dropping the timed-out future releases the pooled connection.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Deadline {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Runs one store call, failing with `StoreError::Timeout` when the
    /// deadline passes first.
    pub async fn bound<T, F>(&self, call: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout_at(self.at, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.budget)),
        }
    }

    /// Runs an idempotent read up to `attempts` times while time remains.
    /// Only backend failures are retried. Never use this for writes.
    pub async fn retry_read<T, F, Fut>(&self, attempts: u32, mut read: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.bound(read()).await {
                Err(err) if err.is_transient() && attempt < attempts && !self.is_expired() => {
                    warn!("read attempt {attempt}/{attempts} failed, retrying: {err}");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
