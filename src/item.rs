use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::LoadError;

/// TTL applied to a remote write when no explicit one is set.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Remote-tier lifetime of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use [`DEFAULT_TTL`].
    #[default]
    Default,
    /// Do not persist to the remote tier; the local tier is still
    /// populated.
    Never,
    /// Explicit lifetime.
    At(Duration),
}

impl Ttl {
    /// The remote-tier TTL to apply, or `None` when the remote write
    /// must be skipped.
    pub(crate) fn resolve(self) -> Option<Duration> {
        match self {
            Ttl::Default => Some(DEFAULT_TTL),
            Ttl::Never => None,
            Ttl::At(d) => Some(d),
        }
    }
}

/// User-supplied origin loader.
///
/// `Ok(None)` means the origin answered with no value; the cache stores
/// empty bytes for it, which reads back as `Ok(None)` without touching
/// the codec. To signal that the value does not exist at all (and arm
/// the negative cache), return an error recognized by the cache's
/// not-found classifier.
pub type Loader<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Option<T>, LoadError>> + Send + Sync>;

/// A single cache request: key, optional value or loader, and the write
/// flags that shape how the tiers are touched.
///
/// Items are short-lived records built with chained setters:
///
/// ```ignore
/// let item = Item::new("user:42")
///     .ttl(Ttl::At(Duration::from_secs(60)))
///     .refresh(true)
///     .loader(|| async { Ok(Some(load_user(42).await?)) });
/// cache.once(&item).await?;
/// ```
pub struct Item<T> {
    pub(crate) key: String,
    pub(crate) value: Option<T>,
    pub(crate) loader: Option<Loader<T>>,
    pub(crate) ttl: Ttl,
    pub(crate) refresh: bool,
    pub(crate) skip_local: bool,
    pub(crate) set_nx: bool,
    pub(crate) set_xx: bool,
}

impl<T> Item<T> {
    /// Start an item for the given key.
    pub fn new(key: impl Into<String>) -> Self {
        Item {
            key: key.into(),
            value: None,
            loader: None,
            ttl: Ttl::Default,
            refresh: false,
            skip_local: false,
            set_nx: false,
            set_xx: false,
        }
    }

    /// Attach the value to store.
    pub fn value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    /// Attach an origin loader, invoked on a miss (and by the refresh
    /// engine when [`refresh`](Self::refresh) is enabled).
    pub fn loader<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>, LoadError>> + Send + 'static,
    {
        self.loader = Some(Arc::new(move || {
            let fut: BoxFuture<'static, Result<Option<T>, LoadError>> = Box::pin(f());
            fut
        }));
        self
    }

    /// Set the remote-tier TTL.
    pub fn ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    /// Register the key for periodic background refresh. Takes effect
    /// only in [`once`](crate::Cache::once) and only when the cache was
    /// built with a positive refresh interval.
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Bypass the local tier for this request.
    pub fn skip_local(mut self, skip: bool) -> Self {
        self.skip_local = skip;
        self
    }

    /// Write the remote tier only if the key does not already exist.
    /// Mutually exclusive with [`set_xx`](Self::set_xx), which wins if
    /// both are set.
    pub fn set_nx(mut self, set_nx: bool) -> Self {
        self.set_nx = set_nx;
        self
    }

    /// Write the remote tier only if the key already exists.
    pub fn set_xx(mut self, set_xx: bool) -> Self {
        self.set_xx = set_xx;
        self
    }

    /// The key this item addresses.
    pub fn key(&self) -> &str {
        &self.key
    }
}
