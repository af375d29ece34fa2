//! tiercache - A two-tier cache coordinator for Rust
//!
//! This library fronts an in-process cache and a shared remote cache
//! behind a single interface, with:
//! - Read coalescing: one loader execution per key under a thundering herd
//! - Negative caching: "not found" memoized with a jittered TTL
//! - Asynchronous refresh: per-key background reloads before expiry, with
//!   a best-effort distributed lock so only one node hits the origin
//! - Idle reclamation: refresh tasks expire after an idle window
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde::{Serialize, Deserialize};
//! use tiercache::{Cache, Item, MokaLocal, MokaLocalConfig, RedisRemote, RedisRemoteConfig};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Cache::builder("users")
//!         .local(Arc::new(MokaLocal::new(MokaLocalConfig::default())))
//!         .remote(Arc::new(RedisRemote::new(RedisRemoteConfig {
//!             url: "redis://localhost:6379".into(),
//!         }).await?))
//!         .refresh_duration(Duration::from_secs(60))
//!         .build();
//!
//!     let item = Item::new("user:123")
//!         .refresh(true)
//!         .loader(|| async {
//!             // Load from the database on a miss; refreshed in the
//!             // background from here on.
//!             Ok(Some(User { id: 123, name: "Alice".into() }))
//!         });
//!     let user: Option<User> = cache.once(&item).await?;
//!
//!     Ok(())
//! }
//! ```

mod builder;
mod cache;
mod codec;
mod error;
mod group;
mod item;
pub mod local;
mod refresh;
pub mod remote;
mod stats;
mod utils;

// Re-export public API
pub use builder::Builder;
pub use cache::{Cache, CacheType, NOT_FOUND_PLACEHOLDER};
pub use codec::Codec;
pub use error::{CacheError, LoadError, NotFoundClassifier, default_not_found_classifier};
pub use item::{DEFAULT_TTL, Item, Loader, Ttl};
pub use local::{HashMapLocal, HashMapLocalConfig, LocalCache, MokaLocal, MokaLocalConfig};
pub use remote::{RedisRemote, RedisRemoteConfig, RemoteCache};
pub use stats::{Counters, Handles, Snapshot, StatsHandler};
