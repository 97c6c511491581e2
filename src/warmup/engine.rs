use super::{WarmUpEngine, WarmUpStats};
use crate::connection::Cluster;
use crate::core::{RegistryError, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, event, info_span};

#[derive(Default)]
struct WarmUpCounters {
    window_started_at_ms: AtomicI64,
    expected: AtomicUsize,
    executed: AtomicUsize,
    failed: AtomicUsize,
    submitted: AtomicUsize,
}

impl WarmUpCounters {
    fn record_executed(&self, succeeded: bool) {
        if !succeeded {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        let executed = self.executed.fetch_add(1, Ordering::SeqCst) + 1;
        let expected = self.expected.load(Ordering::SeqCst);
        if expected > 0 && executed == expected {
            let started = self.window_started_at_ms.load(Ordering::SeqCst);
            let elapsed = (Utc::now().timestamp_millis() - started).max(0);
            info!("There are {} tables warmed up, took {} ms.", executed, elapsed);
        }
    }

    fn withdraw_expected(&self) {
        let _ = self
            .expected
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn reset(&self) {
        self.window_started_at_ms.store(0, Ordering::SeqCst);
        self.expected.store(0, Ordering::SeqCst);
        self.executed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
    }
}

/// Default [`WarmUpEngine`]: one tokio task per table, gated by a semaphore.
///
/// Each task asks the owning connection to warm the table up. Failures are
/// logged and counted; they never reach the discovery caller.
///
/// A rejected submission gives back the expected count taken for it, so
/// the window can still complete.
pub struct RegionWarmUpEngine {
    permits: RwLock<Arc<Semaphore>>,
    parallelism: AtomicUsize,
    counters: Arc<WarmUpCounters>,
    /// Join handles per cluster name, drained by `drain`.
    pending: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
    shut_down: AtomicBool,
}

impl RegionWarmUpEngine {
    pub fn new() -> Self {
        Self {
            permits: RwLock::new(Arc::new(Semaphore::new(1))),
            parallelism: AtomicUsize::new(1),
            counters: Arc::new(WarmUpCounters::default()),
            pending: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WarmUpStats {
        let pending = self
            .pending
            .lock()
            .map(|pending| {
                pending
                    .values()
                    .flatten()
                    .filter(|handle| !handle.is_finished())
                    .count()
            })
            .unwrap_or_default();

        WarmUpStats {
            parallelism: self.parallelism(),
            window_started_at_ms: self.counters.window_started_at_ms.load(Ordering::SeqCst),
            expected: self.counters.expected.load(Ordering::SeqCst),
            executed: self.counters.executed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            pending,
        }
    }

    fn current_permits(&self) -> Result<Arc<Semaphore>> {
        Ok(Arc::clone(&*self.permits.read()?))
    }

    fn submission_context(&self) -> Result<(Handle, Arc<Semaphore>)> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RegistryError::ExecutionError(
                "warm-up engine is shut down".to_string(),
            ));
        }
        let runtime = Handle::try_current().map_err(|err| {
            RegistryError::ExecutionError(format!("warm-up needs a tokio runtime: {}", err))
        })?;
        Ok((runtime, self.current_permits()?))
    }
}

impl Default for RegionWarmUpEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WarmUpEngine for RegionWarmUpEngine {
    fn configure(&self, parallelism: usize) {
        let parallelism = parallelism.max(1);
        if self.parallelism.swap(parallelism, Ordering::SeqCst) == parallelism {
            return;
        }
        // Tasks already waiting keep the old semaphore.
        match self.permits.write() {
            Ok(mut permits) => *permits = Arc::new(Semaphore::new(parallelism)),
            Err(err) => warn!("Failed to resize warm-up pool: {}", err),
        }
    }

    fn begin_statistics_window(&self, started_at_ms: i64) {
        self.counters
            .window_started_at_ms
            .store(started_at_ms, Ordering::SeqCst);
    }

    fn increment_expected_count(&self) {
        self.counters.expected.fetch_add(1, Ordering::SeqCst);
    }

    fn submit(&self, table_name: &str, cluster: &Cluster) -> Result<()> {
        let (runtime, permits) = match self.submission_context() {
            Ok(context) => context,
            Err(err) => {
                self.counters.withdraw_expected();
                return Err(err);
            }
        };
        let counters = Arc::clone(&self.counters);
        let connection = Arc::clone(cluster.connection());
        let table = table_name.to_string();
        let span = info_span!(
            "warmup.table",
            cluster = %cluster.name(),
            table = %table_name
        );

        let handle = runtime.spawn(
            async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                match connection.warm_up(&table).await {
                    Ok(()) => {
                        event!(Level::DEBUG, "table warmed up");
                        counters.record_executed(true);
                    }
                    Err(err) => {
                        warn!("Warm up table `{}` failed: {}", table, err);
                        counters.record_executed(false);
                    }
                }
            }
            .instrument(span),
        );

        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock()?;
        let handles = pending.entry(cluster.name().to_string()).or_default();
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle);
        Ok(())
    }

    async fn drain(&self, cluster_name: &str) -> Result<()> {
        let handles = {
            let mut pending = self.pending.lock()?;
            pending.remove(cluster_name).unwrap_or_default()
        };

        let mut first_failure = None;
        for result in join_all(handles).await {
            match result {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(RegistryError::ExecutionError(format!(
                "warm-up task for cluster `{}` failed: {}",
                cluster_name, err
            ))),
            None => Ok(()),
        }
    }

    fn reset_statistics(&self) {
        self.counters.reset();
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|_, handles| {
                handles.retain(|handle| !handle.is_finished());
                !handles.is_empty()
            });
        }
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(permits) = self.current_permits() {
            permits.close();
        }
        let handles: Vec<JoinHandle<()>> = match self.pending.lock() {
            Ok(mut pending) => pending.drain().flat_map(|(_, handles)| handles).collect(),
            Err(_) => Vec::new(),
        };
        for handle in &handles {
            handle.abort();
        }
        join_all(handles).await;
    }
}
