//! Cache statistics contract and the bundled handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CacheError;

/// Counter sink for cache activity.
///
/// Implementations must be cheap: every increment sits on the read or
/// write hot path.
pub trait StatsHandler: Send + Sync {
    fn incr_hit(&self);
    fn incr_miss(&self);
    fn incr_local_hit(&self);
    fn incr_local_miss(&self);
    fn incr_remote_hit(&self);
    fn incr_remote_miss(&self);
    /// A loader was about to run.
    fn incr_query(&self);
    /// A loader failed with a non-not-found error.
    fn incr_query_fail(&self, err: &CacheError);
}

/// Fans increments out to a list of sinks, or drops them all when
/// disabled. An empty `Handles` is the crate's null handler.
pub struct Handles {
    disabled: bool,
    handlers: Vec<Arc<dyn StatsHandler>>,
}

impl Handles {
    pub fn new(disabled: bool, handlers: Vec<Arc<dyn StatsHandler>>) -> Self {
        Handles { disabled, handlers }
    }

    fn each(&self, f: impl Fn(&dyn StatsHandler)) {
        if self.disabled {
            return;
        }
        for handler in &self.handlers {
            f(handler.as_ref());
        }
    }
}

impl StatsHandler for Handles {
    fn incr_hit(&self) {
        self.each(|h| h.incr_hit());
    }

    fn incr_miss(&self) {
        self.each(|h| h.incr_miss());
    }

    fn incr_local_hit(&self) {
        self.each(|h| h.incr_local_hit());
    }

    fn incr_local_miss(&self) {
        self.each(|h| h.incr_local_miss());
    }

    fn incr_remote_hit(&self) {
        self.each(|h| h.incr_remote_hit());
    }

    fn incr_remote_miss(&self) {
        self.each(|h| h.incr_remote_miss());
    }

    fn incr_query(&self) {
        self.each(|h| h.incr_query());
    }

    fn incr_query_fail(&self, err: &CacheError) {
        self.each(|h| h.incr_query_fail(err));
    }
}

/// Point-in-time view of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub hit: u64,
    pub miss: u64,
    pub local_hit: u64,
    pub local_miss: u64,
    pub remote_hit: u64,
    pub remote_miss: u64,
    pub query: u64,
    pub query_fail: u64,
}

/// Atomic in-process counters, handy for monitoring endpoints and tests.
#[derive(Default)]
pub struct Counters {
    hit: AtomicU64,
    miss: AtomicU64,
    local_hit: AtomicU64,
    local_miss: AtomicU64,
    remote_hit: AtomicU64,
    remote_miss: AtomicU64,
    query: AtomicU64,
    query_fail: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Counters::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            local_hit: self.local_hit.load(Ordering::Relaxed),
            local_miss: self.local_miss.load(Ordering::Relaxed),
            remote_hit: self.remote_hit.load(Ordering::Relaxed),
            remote_miss: self.remote_miss.load(Ordering::Relaxed),
            query: self.query.load(Ordering::Relaxed),
            query_fail: self.query_fail.load(Ordering::Relaxed),
        }
    }
}

impl StatsHandler for Counters {
    fn incr_hit(&self) {
        self.hit.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_miss(&self) {
        self.miss.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_local_hit(&self) {
        self.local_hit.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_local_miss(&self) {
        self.local_miss.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_remote_hit(&self) {
        self.remote_hit.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_remote_miss(&self) {
        self.remote_miss.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_query(&self) {
        self.query.fetch_add(1, Ordering::Relaxed);
    }

    fn incr_query_fail(&self, _err: &CacheError) {
        self.query_fail.fetch_add(1, Ordering::Relaxed);
    }
}
