use crate::core::{RegistryError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for warm-up parallelism.
pub const MAX_WARM_UP_THREADS: usize = 30;

/// Property keys understood by the cluster registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Block table discovery until warm-up of the cluster has drained.
    IsSyncWarmUp,
    /// Number of concurrent warm-up tasks, clamped to (0, 30].
    WarmUpThreadNum,
    /// Period of background table rediscovery. Zero disables it.
    MetaRefreshIntervalMilliseconds,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 3] = [
        PropertyKey::IsSyncWarmUp,
        PropertyKey::WarmUpThreadNum,
        PropertyKey::MetaRefreshIntervalMilliseconds,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            PropertyKey::IsSyncWarmUp => "IS_SYNC_WARM_UP",
            PropertyKey::WarmUpThreadNum => "WARM_UP_THREAD_NUM",
            PropertyKey::MetaRefreshIntervalMilliseconds => "META_REFRESH_INTERVAL_MILLISECONDS",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            PropertyKey::IsSyncWarmUp => "false",
            PropertyKey::WarmUpThreadNum => "1",
            PropertyKey::MetaRefreshIntervalMilliseconds => "0",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|each| each.key().eq_ignore_ascii_case(key.trim()))
    }
}

/// Registry configuration
///
/// Read once when the registry is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryProperties {
    #[serde(rename = "IS_SYNC_WARM_UP")]
    pub is_sync_warm_up: bool,

    /// Raw configured value; see [`RegistryProperties::effective_warm_up_threads`]
    #[serde(rename = "WARM_UP_THREAD_NUM")]
    pub warm_up_thread_num: i64,

    #[serde(rename = "META_REFRESH_INTERVAL_MILLISECONDS")]
    pub meta_refresh_interval_millis: u64,
}

impl RegistryProperties {
    pub fn new() -> Self {
        Self {
            is_sync_warm_up: false,
            warm_up_thread_num: 1,
            meta_refresh_interval_millis: 0,
        }
    }

    /// Set synchronous warm-up mode
    pub fn sync_warm_up(mut self, enabled: bool) -> Self {
        self.is_sync_warm_up = enabled;
        self
    }

    /// Set the configured warm-up thread number
    pub fn warm_up_threads(mut self, threads: i64) -> Self {
        self.warm_up_thread_num = threads;
        self
    }

    /// Set the background rediscovery period
    pub fn meta_refresh_interval(mut self, interval: Duration) -> Self {
        self.meta_refresh_interval_millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build from string key/value pairs
    ///
    /// Keys are matched case-insensitively. Unknown keys are ignored.
    ///
    /// ```ignore
    /// let props = RegistryProperties::from_props([("WARM_UP_THREAD_NUM", "8")])?;
    /// ```
    pub fn from_props<I, K, V>(props: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut result = Self::new();
        for (key, value) in props {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            let Some(property) = PropertyKey::from_key(key) else {
                warn!("Ignoring unknown registry property `{}`", key);
                continue;
            };
            result.set(property, value)?;
        }
        result.validate()?;
        Ok(result)
    }

    /// Parse from a JSON object keyed by property name
    pub fn from_json_str(json: &str) -> Result<Self> {
        let props: Self = serde_json::from_str(json)?;
        props.validate()?;
        Ok(props)
    }

    /// Load from a JSON file
    pub fn load_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    fn set(&mut self, property: PropertyKey, value: &str) -> Result<()> {
        let invalid = || RegistryError::InvalidProperty {
            key: property.key().to_string(),
            value: value.to_string(),
        };
        match property {
            PropertyKey::IsSyncWarmUp => {
                self.is_sync_warm_up = value.to_ascii_lowercase().parse().map_err(|_| invalid())?;
            }
            PropertyKey::WarmUpThreadNum => {
                self.warm_up_thread_num = value.parse().map_err(|_| invalid())?;
            }
            PropertyKey::MetaRefreshIntervalMilliseconds => {
                self.meta_refresh_interval_millis = value.parse().map_err(|_| invalid())?;
            }
        }
        Ok(())
    }

    /// Get the value of a property rendered as a string
    pub fn value(&self, property: PropertyKey) -> String {
        match property {
            PropertyKey::IsSyncWarmUp => self.is_sync_warm_up.to_string(),
            PropertyKey::WarmUpThreadNum => self.warm_up_thread_num.to_string(),
            PropertyKey::MetaRefreshIntervalMilliseconds => {
                self.meta_refresh_interval_millis.to_string()
            }
        }
    }

    /// Warm-up parallelism actually used, always in (0, 30]
    pub fn effective_warm_up_threads(&self) -> usize {
        if self.warm_up_thread_num <= 0 {
            return 1;
        }
        (self.warm_up_thread_num as u64).min(MAX_WARM_UP_THREADS as u64) as usize
    }

    /// Background rediscovery period, if enabled
    pub fn meta_refresh_interval_opt(&self) -> Option<Duration> {
        (self.meta_refresh_interval_millis > 0)
            .then(|| Duration::from_millis(self.meta_refresh_interval_millis))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // At most one day.
        if self.meta_refresh_interval_millis > 24 * 60 * 60 * 1000 {
            return Err(RegistryError::InvalidProperty {
                key: PropertyKey::MetaRefreshIntervalMilliseconds.key().to_string(),
                value: self.meta_refresh_interval_millis.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RegistryProperties {
    fn default() -> Self {
        Self::new()
    }
}
