use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use super::LocalCache;

/// Configuration for [`MokaLocal`].
#[derive(Debug, Clone)]
pub struct MokaLocalConfig {
    /// Maximum number of entries the cache can hold.
    pub max_capacity: u64,

    /// Time to live: entries are expired after this duration from insertion.
    /// `None` means entries never expire based on time (only by size limit).
    pub time_to_live: Option<Duration>,

    /// Time to idle: entries are expired if not accessed within this duration.
    /// `None` means entries don't expire based on idle time.
    pub time_to_idle: Option<Duration>,
}

impl Default for MokaLocalConfig {
    fn default() -> Self {
        MokaLocalConfig {
            max_capacity: 10_000,
            time_to_live: None,
            time_to_idle: None,
        }
    }
}

/// High-performance concurrent local tier using Moka.
///
/// Lock-free concurrent access with automatic background eviction; the
/// right choice for production workloads with many threads or large key
/// counts. Bytes are held behind an `Arc` so Moka's internal clones stay
/// cheap; `get` copies them out at the boundary.
pub struct MokaLocal {
    cache: Cache<String, Arc<Vec<u8>>>,
}

impl MokaLocal {
    pub fn new(config: MokaLocalConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);

        if let Some(ttl) = config.time_to_live {
            builder = builder.time_to_live(ttl);
        }

        if let Some(tti) = config.time_to_idle {
            builder = builder.time_to_idle(tti);
        }

        MokaLocal {
            cache: builder.build(),
        }
    }

    /// Number of entries currently held (for monitoring/debugging).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl LocalCache for MokaLocal {
    fn set(&self, key: &str, value: Vec<u8>) {
        self.cache.insert(key.to_string(), Arc::new(value));
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.cache.get(key).map(|bytes| bytes.as_ref().clone())
    }

    fn del(&self, key: &str) {
        self.cache.invalidate(key);
    }
}
