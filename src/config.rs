//! Configuration for the result cache and the get helper.
//!
//! Both structs deserialize from JSON with every field optional, falling back
//! to [`Default`] for anything missing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheError;

/// Configuration for a [`SwrCache`](crate::SwrCache).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of keys to hold.
    ///
    /// `None` keeps every key for the lifetime of the cache (`HashMapStore`).
    /// `Some` selects the bounded `MokaStore`.
    pub max_entries: Option<u64>,

    /// Fail fetches that have not settled after this many milliseconds.
    ///
    /// `None` waits forever: a fetch that never settles blocks every future
    /// refresh of its key.
    pub fetch_timeout_ms: Option<u64>,
}

/// Configuration for the [`GetHelper`](crate::GetHelper).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetHelperConfig {
    /// Serve queries through the stale-while-revalidate cache.
    pub cache_enabled: bool,

    /// Settings for the cache, used when `cache_enabled` is set.
    pub cache: CacheConfig,

    /// Log a warning when a query takes longer than this many milliseconds.
    pub threshold_ms: Option<u64>,

    /// Give up on a query after this many milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for GetHelperConfig {
    fn default() -> Self {
        GetHelperConfig {
            cache_enabled: true,
            cache: CacheConfig::default(),
            threshold_ms: None,
            timeout_ms: None,
        }
    }
}

impl GetHelperConfig {
    /// Parse a config from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        serde_json::from_str(json).map_err(|e| CacheError::Config(e.to_string()))
    }

    pub fn threshold(&self) -> Option<Duration> {
        self.threshold_ms.map(Duration::from_millis)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
