use super::{AdminClient, RemoteConnection};
use crate::core::{RegistryError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

/// Injected failures for an [`InMemoryConnection`].
#[derive(Debug, Default, Clone)]
struct InMemoryFaults {
    list_tables: Option<String>,
    close: Option<String>,
    warm_up: HashSet<String>,
}

/// An in-process [`RemoteConnection`] for tests and embedding.
///
/// Holds a mutable table list and counts every call made against it, so
/// callers can assert exactly what the registry did.
pub struct InMemoryConnection {
    endpoint: String,
    tables: Mutex<Vec<String>>,
    faults: Mutex<InMemoryFaults>,
    warm_up_delay: Mutex<Option<Duration>>,
    warm_up_gate: Arc<RwLock<()>>,
    warmed: Mutex<Vec<String>>,
    admin_calls: AtomicUsize,
    warm_up_calls: AtomicUsize,
    close_calls: AtomicUsize,
    closed: AtomicBool,
}

impl InMemoryConnection {
    pub fn new(endpoint: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            tables: Mutex::new(Vec::new()),
            faults: Mutex::new(InMemoryFaults::default()),
            warm_up_delay: Mutex::new(None),
            warm_up_gate: Arc::new(RwLock::new(())),
            warmed: Mutex::new(Vec::new()),
            admin_calls: AtomicUsize::new(0),
            warm_up_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_tables<I, S>(endpoint: impl Into<String>, tables: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let conn = Self::new(endpoint);
        for table in tables {
            conn.add_table(table);
        }
        conn
    }

    /// Create a table on the simulated cluster.
    pub fn add_table(&self, table: impl Into<String>) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.push(table.into());
        }
    }

    /// Make the next administrative listings fail with `message`.
    pub fn fail_list_tables(&self, message: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.list_tables = Some(message.into());
        }
    }

    /// Make `close` fail with `message`.
    pub fn fail_close(&self, message: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.close = Some(message.into());
        }
    }

    /// Make warm-up of `table` fail.
    pub fn fail_warm_up(&self, table: impl Into<String>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.warm_up.insert(table.into());
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults = InMemoryFaults::default();
        }
    }

    /// Delay every warm-up by `delay`.
    pub fn set_warm_up_delay(&self, delay: Duration) {
        if let Ok(mut slot) = self.warm_up_delay.lock() {
            *slot = Some(delay);
        }
    }

    /// Block warm-ups until the returned guard is dropped.
    pub async fn hold_warm_up(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.warm_up_gate).write_owned().await
    }

    /// Tables warmed successfully, in completion order.
    pub fn warmed_tables(&self) -> Vec<String> {
        self.warmed.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn admin_calls(&self) -> usize {
        self.admin_calls.load(Ordering::SeqCst)
    }

    pub fn warm_up_calls(&self) -> usize {
        self.warm_up_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RegistryError::Connection(format!(
                "connection to '{}' is closed",
                self.endpoint
            )));
        }
        Ok(())
    }

    fn faults(&self) -> Result<InMemoryFaults> {
        Ok(self.faults.lock()?.clone())
    }
}

struct InMemoryAdmin {
    tables: Vec<String>,
    failure: Option<String>,
}

#[async_trait]
impl AdminClient for InMemoryAdmin {
    async fn list_tables(&self) -> Result<Vec<String>> {
        match &self.failure {
            Some(message) => Err(RegistryError::Connection(message.clone())),
            None => Ok(self.tables.clone()),
        }
    }
}

#[async_trait]
impl RemoteConnection for InMemoryConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn admin(&self) -> Result<Box<dyn AdminClient>> {
        self.ensure_open()?;
        self.admin_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryAdmin {
            tables: self.tables.lock()?.clone(),
            failure: self.faults()?.list_tables,
        }))
    }

    async fn warm_up(&self, table_name: &str) -> Result<()> {
        self.warm_up_calls.fetch_add(1, Ordering::SeqCst);
        let _gate = self.warm_up_gate.read().await;
        let delay = *self.warm_up_delay.lock()?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_open()?;
        if self.faults()?.warm_up.contains(table_name) {
            return Err(RegistryError::Connection(format!(
                "region lookup failed for table '{}'",
                table_name
            )));
        }
        self.warmed.lock()?.push(table_name.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.faults()?.close {
            return Err(RegistryError::Connection(message));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
