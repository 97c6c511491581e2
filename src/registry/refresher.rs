use super::ClusterRegistry;
use crate::core::{RegistryError, Result};
use log::{info, warn};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

const META_REFRESHER: &str = "meta-refresher";

/// Periodically rediscover tables on every cluster of `registry`.
///
/// The worker only keeps a weak reference and stops once the registry is
/// dropped or closed.
pub(super) fn spawn_meta_refresher(registry: &Arc<ClusterRegistry>, interval: Duration) -> Result<()> {
    let weak = Arc::downgrade(registry);
    registry
        .executor_manager
        .spawn_periodic(META_REFRESHER, interval, move || {
            let weak = weak.clone();
            async move {
                let Some(registry) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                match registry.refresh_all().await {
                    Ok(0) => ControlFlow::Continue(()),
                    Ok(loaded) => {
                        info!("Meta refresher registered {} new table(s).", loaded);
                        ControlFlow::Continue(())
                    }
                    Err(RegistryError::RegistryClosed) => ControlFlow::Break(()),
                    Err(err) => {
                        warn!("Meta refresh failed: {}", err);
                        ControlFlow::Continue(())
                    }
                }
            }
        })?;
    info!("Meta refresher started, interval {} ms.", interval.as_millis());
    Ok(())
}
