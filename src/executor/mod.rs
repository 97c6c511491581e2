use crate::core::{RegistryError, Result};
use log::{debug, warn};
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// A named periodic background task.
struct BackgroundWorker {
    name: String,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    fn signal_stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.signal_stop();
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Owns the long-lived background workers of the registry.
///
/// Workers are stopped through a oneshot signal and awaited on [`close`].
///
/// [`close`]: BackgroundExecutorManager::close
#[derive(Default)]
pub struct BackgroundExecutorManager {
    workers: Mutex<Vec<BackgroundWorker>>,
    closed: AtomicBool,
}

impl BackgroundExecutorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` every `interval` until it breaks or the manager closes.
    ///
    /// The first tick fires one full interval after spawning.
    pub fn spawn_periodic<F, Fut>(&self, name: &str, interval: Duration, mut tick: F) -> Result<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::ExecutionError(format!(
                "cannot start worker '{}': executor manager is closed",
                name
            )));
        }
        if interval.is_zero() {
            return Err(RegistryError::ExecutionError(format!(
                "worker '{}' needs a non-zero interval",
                name
            )));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let worker_name = name.to_string();
        let join_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = sleep(interval) => {
                        if tick().await.is_break() {
                            debug!("Background worker '{}' finished", worker_name);
                            break;
                        }
                    }
                }
            }
        });

        self.workers.lock()?.push(BackgroundWorker {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        });
        Ok(())
    }

    /// Number of workers started and not yet closed.
    pub fn worker_count(&self) -> usize {
        self.workers.lock().map(|w| w.len()).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop every worker and wait for it to exit.
    ///
    /// All workers are awaited even if one of them panicked; the first join
    /// failure is returned afterwards. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let workers = std::mem::take(&mut *self.workers.lock()?);

        let mut first_failure = None;
        for mut worker in workers {
            worker.signal_stop();
            let Some(join_handle) = worker.join_handle.take() else {
                continue;
            };
            if let Err(err) = join_handle.await {
                warn!("Background worker '{}' ended abnormally: {}", worker.name, err);
                first_failure.get_or_insert(RegistryError::ExecutionError(format!(
                    "background worker '{}' join: {}",
                    worker.name, err
                )));
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
