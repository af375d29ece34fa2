//! Local (in-process) tier contract and implementations.

pub mod memory;
pub mod moka;

pub use memory::{HashMapLocal, HashMapLocalConfig};
pub use moka::{MokaLocal, MokaLocalConfig};

/// The in-process tier.
///
/// Implementations are concurrent-safe and own their expiry policy; the
/// coordinator treats the local tier as a hint and never surfaces its
/// failures. `get` hands out an owned copy, never a view into the
/// tier's internal buffer.
pub trait LocalCache: Send + Sync {
    /// Store the bytes for the key.
    fn set(&self, key: &str, value: Vec<u8>);

    /// Return the bytes for the key, or `None` on a miss.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Remove the key.
    fn del(&self, key: &str);
}
