mod refresher;

use crate::connection::config::RegistryProperties;
use crate::connection::{Cluster, RemoteConnection};
use crate::core::{RegistryError, Result};
use crate::executor::BackgroundExecutorManager;
use crate::warmup::{RegionWarmUpEngine, WarmUpEngine};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::Mutex;
use tracing::{Instrument, Level, event, info_span};

/// Values fixed at initialization.
struct RegistrySettings {
    properties: RegistryProperties,
    sync_warm_up: bool,
    warm_up_threads: usize,
}

/// Routes table names to the cluster that hosts them.
///
/// Construct one per process, share it as `Arc<ClusterRegistry>`, call
/// [`initialize`](Self::initialize) once, and [`close`](Self::close) on the
/// way out.
///
/// Lookups read a concurrent map and never wait on discovery. Discovery is
/// serialized registry-wide by a single lock that also covers the warm-up
/// statistics it touches. A table is inserted into the map before its
/// warm-up is submitted, so it is routable even while still cold.
///
/// # Examples
///
/// ```ignore
/// let registry = ClusterRegistry::new();
/// registry.initialize(connections, RegistryProperties::new().warm_up_threads(8)).await?;
///
/// let conn = registry.get_connection("orders")?;
/// registry.close().await?;
/// ```
pub struct ClusterRegistry {
    settings: OnceLock<RegistrySettings>,
    clusters: RwLock<Vec<Cluster>>,
    tables: DashMap<String, Cluster>,
    /// Held for cluster registration, each discovery pass and while tearing down.
    discovery_lock: Mutex<()>,
    warm_up: Arc<dyn WarmUpEngine>,
    executor_manager: BackgroundExecutorManager,
    closed: AtomicBool,
}

impl ClusterRegistry {
    /// Create a registry backed by the default [`RegionWarmUpEngine`].
    pub fn new() -> Arc<Self> {
        Self::with_warm_up_engine(Arc::new(RegionWarmUpEngine::new()))
    }

    pub fn with_warm_up_engine(warm_up: Arc<dyn WarmUpEngine>) -> Arc<Self> {
        Arc::new(Self {
            settings: OnceLock::new(),
            clusters: RwLock::new(Vec::new()),
            tables: DashMap::new(),
            discovery_lock: Mutex::new(()),
            warm_up,
            executor_manager: BackgroundExecutorManager::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Register every cluster and discover its tables.
    ///
    /// Clusters are processed in iteration order. A discovery failure aborts
    /// initialization; clusters and tables registered before it stay in
    /// place, and the failing cluster stays registered so that `close` still
    /// releases its connection. If the registry is closed before or during
    /// initialization, every connection not yet registered is closed here and
    /// [`RegistryError::RegistryClosed`] is returned.
    pub async fn initialize<I, S>(
        self: &Arc<Self>,
        connections: I,
        properties: RegistryProperties,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (S, Arc<dyn RemoteConnection>)>,
        S: Into<String>,
    {
        let mut connections = connections.into_iter();
        if self.is_closed() {
            release_connections(connections).await;
            return Err(RegistryError::RegistryClosed);
        }
        properties.validate()?;

        let warm_up_threads = properties.effective_warm_up_threads();
        let settings = RegistrySettings {
            sync_warm_up: properties.is_sync_warm_up,
            warm_up_threads,
            properties,
        };
        self.settings
            .set(settings)
            .map_err(|_| RegistryError::AlreadyInitialized)?;
        self.warm_up.configure(warm_up_threads);

        let mut cluster_count = 0;
        while let Some((name, connection)) = connections.next() {
            let cluster = Cluster::new(name, connection);
            match self.attach_cluster(&cluster).await {
                Ok(_) => cluster_count += 1,
                Err(RegistryError::RegistryClosed) => {
                    release_connection(&cluster).await;
                    release_connections(connections).await;
                    return Err(RegistryError::RegistryClosed);
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            "{} tables loaded from {} clusters.",
            self.tables.len(),
            cluster_count
        );

        if let Some(interval) = self.settings()?.properties.meta_refresh_interval_opt() {
            let _guard = self.discovery_lock.lock().await;
            self.ensure_open()?;
            refresher::spawn_meta_refresher(self, interval)?;
        }
        Ok(())
    }

    /// Register `cluster` and run its first discovery pass.
    ///
    /// Both happen under `discovery_lock`, so a concurrent `close` either
    /// takes the cluster with it or has already closed the registry, in which
    /// case nothing is registered.
    async fn attach_cluster(&self, cluster: &Cluster) -> Result<usize> {
        let _guard = self.discovery_lock.lock().await;
        self.ensure_open()?;
        self.register_cluster(cluster.clone())?;

        let sync_warm_up = self.settings()?.sync_warm_up;
        let span = info_span!("registry.load_tables", cluster = %cluster.name());
        self.discover(cluster, sync_warm_up).instrument(span).await
    }

    fn register_cluster(&self, cluster: Cluster) -> Result<()> {
        let mut clusters = self.clusters.write()?;
        if clusters
            .iter()
            .any(|each| each.name().eq_ignore_ascii_case(cluster.name()))
        {
            return Err(RegistryError::DuplicateCluster(cluster.name().to_string()));
        }
        clusters.push(cluster);
        Ok(())
    }

    /// Bring the table map up to date with `cluster`.
    ///
    /// Returns the number of tables registered by this call. Only one call
    /// runs at a time across the registry; others wait for it.
    pub async fn load_tables(&self, cluster: &Cluster) -> Result<usize> {
        let _guard = self.discovery_lock.lock().await;
        self.ensure_open()?;
        let sync_warm_up = self.settings()?.sync_warm_up;

        let span = info_span!("registry.load_tables", cluster = %cluster.name());
        self.discover(cluster, sync_warm_up).instrument(span).await
    }

    /// Caller must hold `discovery_lock` and have checked the closed state.
    async fn discover(&self, cluster: &Cluster, sync_warm_up: bool) -> Result<usize> {
        self.warm_up
            .begin_statistics_window(Utc::now().timestamp_millis());

        let table_names = cluster
            .list_tables()
            .await
            .map_err(|err| RegistryError::discovery(cluster.name(), err))?;

        let mut loaded = 0;
        for table_name in table_names {
            if !self.register_table(&table_name, cluster) {
                continue;
            }
            info!("Load table `{}` from cluster `{}`.", table_name, cluster.name());
            self.warm_up
                .submit(&table_name, cluster)
                .map_err(|err| RegistryError::discovery(cluster.name(), err))?;
            loaded += 1;
        }

        if sync_warm_up {
            self.warm_up
                .drain(cluster.name())
                .await
                .map_err(|err| RegistryError::discovery(cluster.name(), err))?;
            self.warm_up.reset_statistics();
        }
        event!(Level::DEBUG, loaded, "table discovery finished");
        Ok(loaded)
    }

    /// Insert `table_name` unless present. Returns whether it was new.
    fn register_table(&self, table_name: &str, cluster: &Cluster) -> bool {
        match self.tables.entry(table_name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                self.warm_up.increment_expected_count();
                slot.insert(cluster.clone());
                true
            }
        }
    }

    /// Run discovery against every registered cluster.
    ///
    /// All clusters are attempted; the first failure is returned afterwards.
    pub async fn refresh_all(&self) -> Result<usize> {
        self.ensure_open()?;
        let clusters = self.clusters.read()?.clone();

        let mut loaded = 0;
        let mut first_failure = None;
        for cluster in &clusters {
            match self.load_tables(cluster).await {
                Ok(count) => loaded += count,
                Err(RegistryError::RegistryClosed) => return Err(RegistryError::RegistryClosed),
                Err(err) => {
                    warn!("Refresh of cluster `{}` failed: {}", cluster.name(), err);
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(loaded),
        }
    }

    /// Connection of the cluster owning `table_name`.
    pub fn get_connection(&self, table_name: &str) -> Result<Arc<dyn RemoteConnection>> {
        self.ensure_open()?;
        self.tables
            .get(table_name)
            .map(|entry| Arc::clone(entry.connection()))
            .ok_or_else(|| RegistryError::TableNotFound(table_name.to_string()))
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        !self.is_closed() && self.tables.contains_key(table_name)
    }

    /// Connection of the cluster named `cluster_name`, ignoring case.
    pub fn get_connection_by_cluster(&self, cluster_name: &str) -> Result<Arc<dyn RemoteConnection>> {
        self.ensure_open()?;
        self.clusters
            .read()?
            .iter()
            .find(|each| each.name().eq_ignore_ascii_case(cluster_name))
            .map(|each| Arc::clone(each.connection()))
            .ok_or_else(|| RegistryError::ClusterNotFound(cluster_name.to_string()))
    }

    /// Name of the cluster owning `table_name`.
    pub fn cluster_for_table(&self, table_name: &str) -> Result<String> {
        self.ensure_open()?;
        self.tables
            .get(table_name)
            .map(|entry| entry.name().to_string())
            .ok_or_else(|| RegistryError::TableNotFound(table_name.to_string()))
    }

    pub fn cluster_names(&self) -> Result<Vec<String>> {
        Ok(self
            .clusters
            .read()?
            .iter()
            .map(|c| c.name().to_string())
            .collect())
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn properties(&self) -> Option<&RegistryProperties> {
        self.settings.get().map(|s| &s.properties)
    }

    /// Effective warm-up parallelism, once initialized.
    pub fn warm_up_threads(&self) -> Option<usize> {
        self.settings.get().map(|s| s.warm_up_threads)
    }

    pub fn warm_up_engine(&self) -> &Arc<dyn WarmUpEngine> {
        &self.warm_up
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear everything down.
    ///
    /// Clears the routing state, stops background work and closes every
    /// connection. All connections are attempted even when some fail; the
    /// first failure is reported as [`RegistryError::TeardownFailure`].
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let clusters = {
            let _guard = self.discovery_lock.lock().await;
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            self.tables.clear();
            std::mem::take(&mut *self.clusters.write()?)
        };

        let manager_result = self.executor_manager.close().await;
        self.warm_up.shutdown().await;

        let mut failed = 0;
        let mut first_failure = None;
        for cluster in &clusters {
            if let Err(err) = cluster.connection().close().await {
                warn!("Failed to close connection of cluster `{}`: {}", cluster.name(), err);
                failed += 1;
                first_failure.get_or_insert((cluster.name().to_string(), err));
            }
        }
        info!(
            "Cluster registry closed, {} of {} connections released.",
            clusters.len() - failed,
            clusters.len()
        );

        if let Some((cluster, source)) = first_failure {
            return Err(RegistryError::TeardownFailure {
                cluster,
                failed,
                source: Box::new(source),
            });
        }
        manager_result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RegistryError::RegistryClosed);
        }
        Ok(())
    }

    fn settings(&self) -> Result<&RegistrySettings> {
        self.settings.get().ok_or_else(|| {
            RegistryError::ExecutionError("cluster registry is not initialized".to_string())
        })
    }
}

/// Close a connection the registry never took ownership of.
async fn release_connection(cluster: &Cluster) {
    if let Err(err) = cluster.connection().close().await {
        warn!(
            "Failed to close connection of cluster `{}` handed to a closed registry: {}",
            cluster.name(),
            err
        );
    }
}

async fn release_connections<I, S>(connections: I)
where
    I: IntoIterator<Item = (S, Arc<dyn RemoteConnection>)>,
    S: Into<String>,
{
    for (name, connection) in connections {
        release_connection(&Cluster::new(name, connection)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory::InMemoryConnection;

    #[tokio::test]
    async fn test_load_tables_requires_initialize() {
        let registry = ClusterRegistry::new();
        let cluster = Cluster::new("c1", InMemoryConnection::new("mem://c1"));

        let err = registry.load_tables(&cluster).await.unwrap_err();
        assert!(matches!(err, RegistryError::ExecutionError(_)));
        assert_eq!(registry.table_count(), 0);
    }

    #[tokio::test]
    async fn test_initialize_twice_fails() {
        let registry = ClusterRegistry::new();
        registry
            .initialize(Vec::<(String, Arc<dyn RemoteConnection>)>::new(), RegistryProperties::new())
            .await
            .unwrap();

        let err = registry
            .initialize(Vec::<(String, Arc<dyn RemoteConnection>)>::new(), RegistryProperties::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn test_register_table_is_insert_if_absent() {
        let registry = ClusterRegistry::new();
        let a = Cluster::new("a", InMemoryConnection::new("mem://a"));
        let b = Cluster::new("b", InMemoryConnection::new("mem://b"));

        assert!(registry.register_table("t", &a));
        assert!(!registry.register_table("t", &b));
        assert_eq!(registry.cluster_for_table("t").unwrap(), "a");
    }

    #[tokio::test]
    async fn test_duplicate_cluster_name_rejected() {
        let registry = ClusterRegistry::new();
        let first: Arc<dyn RemoteConnection> = InMemoryConnection::new("mem://1");
        let second: Arc<dyn RemoteConnection> = InMemoryConnection::new("mem://2");
        let connections = vec![("prod", first), ("PROD", second)];

        let err = registry
            .initialize(connections, RegistryProperties::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCluster(name) if name == "PROD"));
        assert_eq!(registry.cluster_names().unwrap(), vec!["prod"]);
    }

    #[test]
    fn test_cluster_names_reports_poisoned_lock() {
        let registry = ClusterRegistry::new();
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _clusters = registry.clusters.write().unwrap();
            panic!("cluster list poisoned");
        }));

        assert!(poisoned.is_err());
        assert!(matches!(registry.cluster_names(), Err(RegistryError::LockError(_))));
    }
}
