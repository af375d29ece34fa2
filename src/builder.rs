//! Builder for [`Cache`] instances.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::cache::{Cache, Inner};
use crate::codec::Codec;
use crate::error::{NotFoundClassifier, default_not_found_classifier};
use crate::group::Group;
use crate::local::LocalCache;
use crate::refresh;
use crate::remote::RemoteCache;
use crate::stats::{Handles, StatsHandler};

const DEFAULT_NOT_FOUND_EXPIRY: Duration = Duration::from_secs(60);
const DEFAULT_STOP_REFRESH_AFTER_LAST_ACCESS: Duration = Duration::from_secs(60 * 60);
const DEFAULT_REFRESH_CONCURRENCY: usize = 4;

/// Upper bound on the not-found TTL jitter.
const MAX_OFFSET: Duration = Duration::from_secs(10);

/// Configures and assembles a [`Cache`].
///
/// ```ignore
/// let cache = Cache::builder("users")
///     .local(Arc::new(MokaLocal::new(MokaLocalConfig::default())))
///     .remote(Arc::new(RedisRemote::new(config).await?))
///     .not_found_expiry(Duration::from_secs(30))
///     .refresh_duration(Duration::from_secs(60))
///     .build();
/// ```
pub struct Builder {
    name: String,
    local: Option<Arc<dyn LocalCache>>,
    remote: Option<Arc<dyn RemoteCache>>,
    codec: Codec,
    not_found_expiry: Duration,
    refresh_duration: Duration,
    stop_refresh_after_last_access: Duration,
    refresh_concurrency: usize,
    stats_handler: Option<Arc<dyn StatsHandler>>,
    stats_disabled: bool,
    classify_not_found: NotFoundClassifier,
}

impl Builder {
    pub fn new(name: impl Into<String>) -> Self {
        Builder {
            name: name.into(),
            local: None,
            remote: None,
            codec: Codec::default(),
            not_found_expiry: DEFAULT_NOT_FOUND_EXPIRY,
            refresh_duration: Duration::ZERO,
            stop_refresh_after_last_access: DEFAULT_STOP_REFRESH_AFTER_LAST_ACCESS,
            refresh_concurrency: DEFAULT_REFRESH_CONCURRENCY,
            stats_handler: None,
            stats_disabled: false,
            classify_not_found: default_not_found_classifier(),
        }
    }

    /// The in-process tier.
    pub fn local(mut self, local: Arc<dyn LocalCache>) -> Self {
        self.local = Some(local);
        self
    }

    /// The shared remote tier.
    pub fn remote(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Codec for structured values; defaults to msgpack. Use
    /// [`Codec::from_name`] to select one from configuration.
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Base TTL of the not-found placeholder (default one minute). The
    /// effective TTL adds uniform jitter capped at a tenth of this value
    /// or ten seconds, whichever is smaller.
    pub fn not_found_expiry(mut self, expiry: Duration) -> Self {
        self.not_found_expiry = expiry;
        self
    }

    /// Interval of the background refresh engine. Zero (the default)
    /// disables it.
    pub fn refresh_duration(mut self, duration: Duration) -> Self {
        self.refresh_duration = duration;
        self
    }

    /// Idle window after which a refresh task is reclaimed (default one
    /// hour).
    pub fn stop_refresh_after_last_access(mut self, window: Duration) -> Self {
        self.stop_refresh_after_last_access = window;
        self
    }

    /// Maximum number of concurrently running refreshes (default 4).
    pub fn refresh_concurrency(mut self, concurrency: usize) -> Self {
        self.refresh_concurrency = concurrency.max(1);
        self
    }

    /// Replace the default (null) stats handler.
    pub fn stats_handler(mut self, handler: Arc<dyn StatsHandler>) -> Self {
        self.stats_handler = Some(handler);
        self
    }

    /// Disable the default stats handler entirely. Ignored when an
    /// explicit handler is set.
    pub fn stats_disabled(mut self, disabled: bool) -> Self {
        self.stats_disabled = disabled;
        self
    }

    /// Decide which loader errors mean "the value does not exist" and
    /// should arm the negative cache. The default matches
    /// [`CacheError::NotFound`](crate::CacheError::NotFound) anywhere in
    /// the error's source chain.
    pub fn not_found_classifier(mut self, classifier: NotFoundClassifier) -> Self {
        self.classify_not_found = classifier;
        self
    }

    /// Assemble the cache. When a refresh interval is set, the ticker is
    /// spawned here, so this must run inside a Tokio runtime.
    pub fn build(self) -> Cache {
        let offset = (self.not_found_expiry / 10).min(MAX_OFFSET);
        let stats = self
            .stats_handler
            .unwrap_or_else(|| Arc::new(Handles::new(self.stats_disabled, Vec::new())));
        let (stop_tx, _stop_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            name: self.name,
            local: self.local,
            remote: self.remote,
            codec: self.codec,
            not_found_expiry: self.not_found_expiry,
            offset,
            refresh_duration: self.refresh_duration,
            stop_refresh_after_last_access: self.stop_refresh_after_last_access,
            refresh_concurrency: self.refresh_concurrency,
            stats,
            classify_not_found: self.classify_not_found,
            group: Group::new(),
            tasks: DashMap::new(),
            tick_lock: tokio::sync::Mutex::new(()),
            stop_tx,
        });

        if !inner.refresh_duration.is_zero() {
            refresh::spawn_ticker(&inner);
        }

        Cache { inner }
    }
}
