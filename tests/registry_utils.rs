#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tableroute::{Cluster, ClusterRegistry, InMemoryConnection, RemoteConnection, Result, WarmUpEngine};

pub fn dyn_conn(conn: &Arc<InMemoryConnection>) -> Arc<dyn RemoteConnection> {
    conn.clone()
}

/// One submitted warm-up as seen by [`RecordingWarmUpEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub table: String,
    pub cluster: String,
    pub visible_at_submit: bool,
}

/// Warm-up engine that records calls instead of running tasks.
///
/// In sync mode every discovery pass is bracketed by
/// `begin_statistics_window` and `reset_statistics`, which lets tests see
/// whether two passes ever overlapped.
#[derive(Default)]
pub struct RecordingWarmUpEngine {
    registry: OnceLock<Weak<ClusterRegistry>>,
    drain_delay: OnceLock<Duration>,
    pub parallelism: AtomicUsize,
    pub expected: AtomicUsize,
    pub windows: AtomicUsize,
    pub resets: AtomicUsize,
    pub open_windows: AtomicUsize,
    pub max_open_windows: AtomicUsize,
    pub drains: Mutex<Vec<String>>,
    pub submissions: Mutex<Vec<Submission>>,
}

impl RecordingWarmUpEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Check table visibility in `registry` at every submit.
    pub fn observe(&self, registry: &Arc<ClusterRegistry>) {
        let _ = self.registry.set(Arc::downgrade(registry));
    }

    pub fn slow_drain(&self, delay: Duration) {
        let _ = self.drain_delay.set(delay);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submitted_for(&self, cluster: &str) -> Vec<String> {
        self.submissions()
            .into_iter()
            .filter(|s| s.cluster == cluster)
            .map(|s| s.table)
            .collect()
    }

    pub fn drains(&self) -> Vec<String> {
        self.drains.lock().unwrap().clone()
    }
}

#[async_trait]
impl WarmUpEngine for RecordingWarmUpEngine {
    fn configure(&self, parallelism: usize) {
        self.parallelism.store(parallelism, Ordering::SeqCst);
    }

    fn begin_statistics_window(&self, _started_at_ms: i64) {
        self.windows.fetch_add(1, Ordering::SeqCst);
        let open = self.open_windows.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_windows.fetch_max(open, Ordering::SeqCst);
    }

    fn increment_expected_count(&self) {
        self.expected.fetch_add(1, Ordering::SeqCst);
    }

    fn submit(&self, table_name: &str, cluster: &Cluster) -> Result<()> {
        let visible_at_submit = self
            .registry
            .get()
            .and_then(Weak::upgrade)
            .map(|registry| registry.table_exists(table_name))
            .unwrap_or(false);
        self.submissions.lock().unwrap().push(Submission {
            table: table_name.to_string(),
            cluster: cluster.name().to_string(),
            visible_at_submit,
        });
        Ok(())
    }

    async fn drain(&self, cluster_name: &str) -> Result<()> {
        if let Some(delay) = self.drain_delay.get() {
            tokio::time::sleep(*delay).await;
        }
        self.drains.lock().unwrap().push(cluster_name.to_string());
        Ok(())
    }

    fn reset_statistics(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.open_windows.fetch_sub(1, Ordering::SeqCst);
    }
}
