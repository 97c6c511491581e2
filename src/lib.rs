// ============================================================================
// tableroute Library
// ============================================================================

pub mod core;
pub mod connection;
pub mod warmup;
pub mod executor;
pub mod registry;

// Re-export main types for convenience
pub use crate::core::{RegistryError, Result};
pub use registry::ClusterRegistry;

// Re-export connection API
pub use connection::{
    AdminClient, Cluster, RemoteConnection,
    config::{MAX_WARM_UP_THREADS, PropertyKey, RegistryProperties},
    memory::InMemoryConnection,
};

// Re-export background machinery
pub use executor::BackgroundExecutorManager;
pub use warmup::{RegionWarmUpEngine, WarmUpEngine, WarmUpStats};
