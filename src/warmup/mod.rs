pub mod engine;

pub use engine::RegionWarmUpEngine;

use crate::connection::Cluster;
use crate::core::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Background pipeline that primes newly discovered tables.
///
/// The registry drives it in a fixed order per discovery pass: open a
/// statistics window, bump the expected count and submit once per new table,
/// and optionally drain the cluster before resetting statistics. Every method
/// except [`WarmUpEngine::drain`] must return without waiting on task
/// completion.
#[async_trait]
pub trait WarmUpEngine: Send + Sync {
    /// Set the number of warm-up tasks allowed to run at once.
    fn configure(&self, parallelism: usize);

    /// Start a new statistics window at `started_at_ms` (unix millis).
    fn begin_statistics_window(&self, started_at_ms: i64);

    /// One more table is expected to be warmed in this window.
    fn increment_expected_count(&self);

    /// Schedule warm-up of `table_name` on `cluster`.
    ///
    /// On error nothing is scheduled and the expected count taken for the
    /// table is given back.
    fn submit(&self, table_name: &str, cluster: &Cluster) -> Result<()>;

    /// Wait for every task submitted for `cluster_name` so far.
    async fn drain(&self, cluster_name: &str) -> Result<()>;

    /// Forget per-window statistics.
    fn reset_statistics(&self);

    /// Stop accepting work and cancel anything still queued.
    async fn shutdown(&self) {}
}

/// Point-in-time counters of a warm-up engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmUpStats {
    pub parallelism: usize,
    pub window_started_at_ms: i64,
    pub expected: usize,
    pub executed: usize,
    pub failed: usize,
    pub submitted: usize,
    pub pending: usize,
}

impl std::fmt::Display for WarmUpStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Warm-up Stats: {}/{} executed, {} failed, {} pending, parallelism {}",
            self.executed, self.expected, self.failed, self.pending, self.parallelism
        )
    }
}
