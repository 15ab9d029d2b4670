//! Claim store port and its realizations.
//!
//! The engine only sees [`ClaimStore`]. [`sqlite::SqliteClaimStore`] is the
//! persistent adapter over a shared beads database;
//! [`memory::MemoryClaimStore`] keeps issues in process.

pub mod filter;
pub mod memory;
pub mod sqlite;
pub mod version;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{AgentName, ClaimFilters, Issue};
use crate::telemetry::metrics;

pub use memory::MemoryClaimStore;
pub use sqlite::{SqliteClaimStore, SqliteStoreOptions};

/// Capability consumed by the claim engine.
///
/// Both operations are cancel-safe: dropping the returned future before it
/// completes leaves the store untouched.
pub trait ClaimStore: Send + Sync {
    /// Atomically select one eligible issue and mark it claimed by `agent`.
    ///
    /// `Ok(None)` means nothing was eligible, or the selected issue was
    /// claimed concurrently between selection and update. Neither case is
    /// retried against another candidate.
    fn claim_one_ready(
        &self,
        agent: &AgentName,
        filters: &ClaimFilters,
    ) -> impl Future<Output = Result<Option<Issue>>> + Send;

    /// Same selection as [`ClaimStore::claim_one_ready`], without mutating.
    fn find_one_ready(
        &self,
        filters: &ClaimFilters,
    ) -> impl Future<Output = Result<Option<Issue>>> + Send;
}

impl<S: ClaimStore> ClaimStore for Arc<S> {
    fn claim_one_ready(
        &self,
        agent: &AgentName,
        filters: &ClaimFilters,
    ) -> impl Future<Output = Result<Option<Issue>>> + Send {
        (**self).claim_one_ready(agent, filters)
    }

    fn find_one_ready(
        &self,
        filters: &ClaimFilters,
    ) -> impl Future<Output = Result<Option<Issue>>> + Send {
        (**self).find_one_ready(filters)
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for busy/contention errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles each time.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after attempt number `attempt` (1-based) failed busy.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }

    /// Delay before the retry that follows busy attempt `attempt`, or `None`
    /// once the attempt budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts.max(1)).then(|| self.backoff(attempt))
    }

    /// Run `op` until it succeeds, fails with a non-busy error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    ///
    /// Backoff is a timer suspension, so a caller deadline can cut it short.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Err(err) if err.is_busy() => {
                    let Some(delay) = self.next_delay(attempt) else {
                        warn!(attempts = attempt, error = %err, "store still busy, giving up");
                        return Err(Error::Busy(format!(
                            "gave up after {attempt} attempts: {err}"
                        )));
                    };
                    metrics::busy_retries()
                        .add(1, &[KeyValue::new("attempt", i64::from(attempt))]);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "store busy, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
