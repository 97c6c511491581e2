pub mod config;
pub mod memory;

use crate::core::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Live session to one remote storage cluster.
///
/// Implementations wrap whatever client the cluster speaks. The registry only
/// needs administrative access for table listing, a per-table warm-up hook and
/// an explicit close.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Human readable endpoint, used in logs.
    fn endpoint(&self) -> &str;

    /// Open an administrative client on this connection.
    async fn admin(&self) -> Result<Box<dyn AdminClient>>;

    /// Prime client-side state for a table (region locations and the like).
    async fn warm_up(&self, table_name: &str) -> Result<()>;

    /// Close the session. Must be safe to call once the connection is idle.
    async fn close(&self) -> Result<()>;
}

/// Administrative interface of a cluster.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Names of every table hosted by the cluster, in the cluster's order.
    async fn list_tables(&self) -> Result<Vec<String>>;
}

/// A named cluster and the connection that reaches it.
///
/// Immutable once built; cloning shares the connection.
#[derive(Clone)]
pub struct Cluster {
    name: String,
    connection: Arc<dyn RemoteConnection>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, connection: Arc<dyn RemoteConnection>) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Arc<dyn RemoteConnection> {
        &self.connection
    }

    /// Run the administrative table listing against this cluster.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let admin = self.connection.admin().await?;
        admin.list_tables().await
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("endpoint", &self.connection.endpoint())
            .finish()
    }
}
