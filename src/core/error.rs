use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Cluster `{0}` is not exists")]
    ClusterNotFound(String),

    #[error("Cluster `{0}` is already registered")]
    DuplicateCluster(String),

    #[error("Table discovery failed for cluster `{cluster}`: {source}")]
    DiscoveryFailure {
        cluster: String,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("Failed to close {failed} cluster connection(s), first failure on `{cluster}`: {source}")]
    TeardownFailure {
        cluster: String,
        failed: usize,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("Cluster registry is closed")]
    RegistryClosed,

    #[error("Cluster registry is already initialized")]
    AlreadyInitialized,

    #[error("Invalid value '{value}' for property `{key}`")]
    InvalidProperty { key: String, value: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/0 error: {0}")]
    IoError(String),
}

impl RegistryError {
    pub fn discovery(cluster: &str, source: RegistryError) -> Self {
        Self::DiscoveryFailure {
            cluster: cluster.to_string(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

impl<T> From<std::sync::PoisonError<T>> for RegistryError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::ExecutionError(format!("invalid properties document: {}", err))
    }
}
