use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::LocalCache;

/// Configuration for [`HashMapLocal`].
#[derive(Debug, Clone, Default)]
pub struct HashMapLocalConfig {
    /// Entries expire this long after insertion. `None` keeps them until
    /// deleted or evicted.
    pub time_to_live: Option<Duration>,

    /// On insert, evict the entries closest to expiry until at most this
    /// many remain. `None` disables the cap.
    pub max_entries: Option<usize>,
}

struct Stored {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Stored {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Thread-safe in-memory tier backed by a `HashMap` with an `RwLock`.
///
/// A simple, zero-dependency tier suitable for low to moderate
/// concurrency and small cache sizes. For high-concurrency workloads,
/// use [`MokaLocal`](super::MokaLocal) instead.
pub struct HashMapLocal {
    state: RwLock<HashMap<String, Stored>>,
    config: HashMapLocalConfig,
}

impl HashMapLocal {
    pub fn new(config: HashMapLocalConfig) -> Self {
        HashMapLocal {
            state: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn evict(state: &mut HashMap<String, Stored>, max_entries: usize, now: Instant) {
        state.retain(|_, stored| !stored.is_expired(now));

        if state.len() > max_entries {
            let mut by_expiry: Vec<_> = state
                .iter()
                .map(|(key, stored)| (key.clone(), stored.expires_at))
                .collect();
            by_expiry.sort_by_key(|(_, expires_at)| *expires_at);

            let excess = state.len() - max_entries;
            for (key, _) in by_expiry.into_iter().take(excess) {
                state.remove(&key);
            }
        }
    }
}

impl LocalCache for HashMapLocal {
    fn set(&self, key: &str, value: Vec<u8>) {
        let now = Instant::now();
        let stored = Stored {
            value,
            expires_at: self.config.time_to_live.map(|ttl| now + ttl),
        };

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.insert(key.to_string(), stored);
        if let Some(max_entries) = self.config.max_entries {
            Self::evict(&mut state, max_entries, now);
        }
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            match state.get(key) {
                Some(stored) if !stored.is_expired(now) => return Some(stored.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it so the map does not accumulate dead entries.
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.get(key).is_some_and(|stored| stored.is_expired(now)) {
            state.remove(key);
        }
        None
    }

    fn del(&self, key: &str) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_del() {
        let local = HashMapLocal::new(HashMapLocalConfig::default());

        assert!(local.get("key1").is_none());

        local.set("key1", b"value1".to_vec());
        assert_eq!(local.get("key1"), Some(b"value1".to_vec()));

        local.del("key1");
        assert!(local.get("key1").is_none());
    }

    #[test]
    fn test_expired_entry_removed() {
        let local = HashMapLocal::new(HashMapLocalConfig {
            time_to_live: Some(Duration::from_millis(10)),
            max_entries: None,
        });

        local.set("key1", b"value1".to_vec());
        assert!(local.get("key1").is_some());

        std::thread::sleep(Duration::from_millis(20));
        assert!(local.get("key1").is_none());
    }

    #[test]
    fn test_max_entries_evicts() {
        let local = HashMapLocal::new(HashMapLocalConfig {
            time_to_live: Some(Duration::from_secs(60)),
            max_entries: Some(2),
        });

        local.set("key1", b"v1".to_vec());
        local.set("key2", b"v2".to_vec());
        local.set("key3", b"v3".to_vec());

        let state = local.state.read().unwrap();
        assert_eq!(state.len(), 2);
    }
}
