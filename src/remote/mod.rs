//! Remote (shared, out-of-process) tier contract and implementations.

pub mod redis;

pub use redis::{RedisRemote, RedisRemoteConfig};

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CacheError;

/// The shared tier: any key-value store with expiring writes and
/// conditional set modes.
///
/// A key that does not exist is reported as `Ok(None)` from [`get`]
/// rather than as an error, so the coordinator can tell "absent" apart
/// from a driver failure.
///
/// [`get`]: RemoteCache::get
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Return the bytes for the key, or `None` when the key does not
    /// exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store the bytes with the given TTL, unconditionally.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Store only if the key does not exist. Returns whether the write
    /// happened.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, CacheError>;

    /// Store only if the key already exists. Returns whether the write
    /// happened.
    async fn set_xx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, CacheError>;

    /// Delete the key, returning how many keys were removed.
    async fn del(&self, key: &str) -> Result<u64, CacheError>;
}
