use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::builder::Builder;
use crate::codec::Codec;
use crate::error::{CacheError, NotFoundClassifier};
use crate::group::Group;
use crate::item::{Item, Ttl};
use crate::local::LocalCache;
use crate::refresh::RefreshTask;
use crate::remote::RemoteCache;
use crate::stats::StatsHandler;

/// Byte sentinel stored in place of a value to memoize "not found".
///
/// Distinct from an absent key and from empty bytes (the latter marks a
/// present-but-valueless entry).
pub const NOT_FOUND_PLACEHOLDER: &[u8] = b"*";

/// Which tiers a cache instance is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    Local,
    Remote,
    Both,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::Local => "local",
            CacheType::Remote => "remote",
            CacheType::Both => "both",
        }
    }
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the remote tier write is conditioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Ex,
    Nx,
    Xx,
}

impl WriteMode {
    fn of<T>(item: &Item<T>) -> Self {
        if item.set_xx {
            WriteMode::Xx
        } else if item.set_nx {
            WriteMode::Nx
        } else {
            WriteMode::Ex
        }
    }
}

/// Failure while producing the bytes to store.
pub(crate) enum ComputeError {
    /// The user loader failed; not yet classified as not-found.
    Loader(crate::error::LoadError),
    /// Marshal failed.
    Codec(CacheError),
}

/// Result of the byte-producing half of a write: the bytes are always
/// valid, the tier write may still have failed.
pub(crate) struct SetOutcome {
    pub(crate) bytes: Vec<u8>,
    pub(crate) write_err: Option<CacheError>,
}

/// Two-tier cache coordinator.
///
/// Fronts an in-process tier and a shared remote tier behind a single
/// interface, with per-key read coalescing, negative caching and an
/// optional background refresh engine. Cheap to clone; clones share all
/// state.
///
/// ```ignore
/// let cache = Cache::builder("users")
///     .local(Arc::new(MokaLocal::new(MokaLocalConfig::default())))
///     .remote(Arc::new(RedisRemote::new(config).await?))
///     .refresh_duration(Duration::from_secs(30))
///     .build();
///
/// let user: Option<User> = cache
///     .once(&Item::new("user:42").refresh(true).loader(|| async {
///         Ok(Some(load_user(42).await?))
///     }))
///     .await?;
/// ```
#[derive(Clone)]
pub struct Cache {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) name: String,
    pub(crate) local: Option<Arc<dyn LocalCache>>,
    pub(crate) remote: Option<Arc<dyn RemoteCache>>,
    pub(crate) codec: Codec,
    pub(crate) not_found_expiry: Duration,
    /// Jitter ceiling for the not-found placeholder TTL.
    pub(crate) offset: Duration,
    pub(crate) refresh_duration: Duration,
    pub(crate) stop_refresh_after_last_access: Duration,
    pub(crate) refresh_concurrency: usize,
    pub(crate) stats: Arc<dyn StatsHandler>,
    pub(crate) classify_not_found: NotFoundClassifier,
    pub(crate) group: Group<Result<(Vec<u8>, bool), CacheError>>,
    pub(crate) tasks: DashMap<String, Arc<RefreshTask>>,
    /// Serializes the refresh tick with `close`.
    pub(crate) tick_lock: tokio::sync::Mutex<()>,
    pub(crate) stop_tx: watch::Sender<bool>,
}

impl Cache {
    /// Start building a cache with the given diagnostic name.
    pub fn builder(name: impl Into<String>) -> Builder {
        Builder::new(name)
    }

    /// The diagnostic name this cache was built with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Store the item: bytes come from its value or its loader, the
    /// local tier is written first (unless skipped), then the remote
    /// tier per the item's write mode and TTL.
    ///
    /// A loader failure classified as not-found writes the placeholder
    /// instead and succeeds.
    pub async fn set<T>(&self, item: &Item<T>) -> Result<(), CacheError>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let outcome = self.inner.set_inner(item).await?;
        match outcome.write_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Fetch and decode the value for the key.
    ///
    /// `Err(CacheMiss)` when no tier holds the key, `Err(NotFound)` on a
    /// placeholder hit, `Ok(None)` when the stored entry is the empty
    /// present-but-valueless marker.
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.get_with(key, false).await
    }

    /// [`get`](Self::get), bypassing the local tier in both directions:
    /// no local lookup, no local write-back.
    pub async fn get_skipping_local<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        self.get_with(key, true).await
    }

    async fn get_with<T>(&self, key: &str, skip_local: bool) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let b = self.inner.get_bytes(key, skip_local).await?;
        if b.is_empty() {
            return Ok(None);
        }
        self.inner.codec.unmarshal(&b).map(Some)
    }

    /// True iff some tier holds bytes for the key that are not the
    /// not-found placeholder.
    pub async fn exists(&self, key: &str) -> bool {
        self.inner.get_bytes(key, false).await.is_ok()
    }

    /// Get the value, or execute the item's loader, cache the result and
    /// return it, with at most one loader execution in flight per key
    /// within the process. Callers that pile onto an in-flight load wait
    /// for it and share its outcome.
    ///
    /// With `refresh(true)` the key is also registered with the refresh
    /// engine; each call renews its last-access time.
    pub async fn once<T>(&self, item: &Item<T>) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.inner.add_or_update_refresh_task(item);

        let mut retried = false;
        loop {
            let (b, cached) = self.inner.fetch_or_load_once(item).await?;

            if b == NOT_FOUND_PLACEHOLDER {
                return Err(CacheError::NotFound);
            }
            if b.is_empty() {
                return Ok(None);
            }

            match self.inner.codec.unmarshal(&b) {
                Ok(value) => return Ok(Some(value)),
                // A cached entry that no longer decodes is poisoned
                // (codec changes, partial writes): drop it and load
                // fresh, once. A fresh value that fails to decode is a
                // bug and surfaces as-is.
                Err(err) => {
                    if cached && !retried {
                        retried = true;
                        let _ = self.delete(&item.key).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Delete the key from both tiers. Local deletion is best effort;
    /// remote errors surface.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if let Some(local) = &self.inner.local {
            local.del(key);
        }

        match &self.inner.remote {
            None => {
                if self.inner.local.is_none() {
                    Err(CacheError::BothNil)
                } else {
                    Ok(())
                }
            }
            Some(remote) => remote.del(key).await.map(|_| ()),
        }
    }

    /// Delete the key from the local tier only.
    pub fn delete_from_local(&self, key: &str) {
        if let Some(local) = &self.inner.local {
            local.del(key);
        }
    }

    /// Which tiers this cache is configured with.
    pub fn cache_type(&self) -> CacheType {
        match (&self.inner.local, &self.inner.remote) {
            (Some(_), Some(_)) => CacheType::Both,
            (None, Some(_)) => CacheType::Remote,
            _ => CacheType::Local,
        }
    }

    /// Number of registered refresh tasks.
    pub fn task_size(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Cancel all refresh tasks and stop the ticker. Idempotent; safe to
    /// call while a tick is running (the call waits for it to finish).
    pub async fn close(&self) {
        let _guard = self.inner.tick_lock.lock().await;
        self.inner.tasks.clear();
        let _ = self.inner.stop_tx.send(true);
    }
}

impl Inner {
    /// Read bytes in tier order: local (unless skipped), then remote
    /// with local write-back. Placeholder hits surface as `NotFound`,
    /// the remote's absent signal as `CacheMiss`.
    pub(crate) async fn get_bytes(&self, key: &str, skip_local: bool) -> Result<Vec<u8>, CacheError> {
        if !skip_local && let Some(local) = &self.local {
            if let Some(b) = local.get(key) {
                self.stats.incr_hit();
                self.stats.incr_local_hit();
                if b == NOT_FOUND_PLACEHOLDER {
                    return Err(CacheError::NotFound);
                }
                return Ok(b);
            }
            self.stats.incr_local_miss();
        }

        let Some(remote) = &self.remote else {
            if self.local.is_none() {
                return Err(CacheError::BothNil);
            }
            self.stats.incr_miss();
            return Err(CacheError::CacheMiss);
        };

        match remote.get(key).await {
            Ok(Some(b)) => {
                self.stats.incr_hit();
                self.stats.incr_remote_hit();
                if b == NOT_FOUND_PLACEHOLDER {
                    return Err(CacheError::NotFound);
                }
                if !skip_local && let Some(local) = &self.local {
                    local.set(key, b.clone());
                }
                Ok(b)
            }
            Ok(None) => {
                self.stats.incr_miss();
                self.stats.incr_remote_miss();
                Err(CacheError::CacheMiss)
            }
            Err(err) => {
                self.stats.incr_miss();
                self.stats.incr_remote_miss();
                Err(err)
            }
        }
    }

    /// The coalesced fetch behind [`Cache::once`]: local fast path, then
    /// per-key singleflight around "re-check tiers, else load and
    /// store". The `bool` is true when the bytes came from a tier rather
    /// than a fresh loader call.
    async fn fetch_or_load_once<T>(&self, item: &Item<T>) -> Result<(Vec<u8>, bool), CacheError>
    where
        T: Serialize + Send + Sync + 'static,
    {
        if let Some(local) = &self.local
            && let Some(b) = local.get(&item.key)
        {
            self.stats.incr_hit();
            self.stats.incr_local_hit();
            if b == NOT_FOUND_PLACEHOLDER {
                return Err(CacheError::NotFound);
            }
            return Ok((b, true));
        }

        let outcome = self
            .group
            .work(&item.key, || async {
                match self.get_bytes(&item.key, item.skip_local).await {
                    Ok(b) => Ok((b, true)),
                    Err(CacheError::NotFound) => Err(CacheError::NotFound),
                    // Miss, misconfiguration or tier failure: fall
                    // through to the loader. Write errors are swallowed
                    // here; the loaded bytes are still good for this
                    // caller.
                    Err(_) => match self.set_inner(item).await {
                        Ok(outcome) => Ok((outcome.bytes, false)),
                        Err(err) => Err(err),
                    },
                }
            })
            .await;

        match outcome {
            Some(result) => result,
            None => Err(CacheError::loader("in-flight load aborted".into())),
        }
    }

    /// Produce the bytes for the item (value or loader) and write the
    /// tiers. `Err` only when no bytes could be produced.
    pub(crate) async fn set_inner<T>(&self, item: &Item<T>) -> Result<SetOutcome, CacheError>
    where
        T: Serialize + Send + Sync + 'static,
    {
        let loaded = match &item.loader {
            Some(loader) => match loader().await {
                Ok(Some(value)) => self
                    .codec
                    .marshal(&value)
                    .map(Some)
                    .map_err(ComputeError::Codec),
                Ok(None) => Ok(None),
                Err(err) => Err(ComputeError::Loader(err)),
            },
            None => match &item.value {
                Some(value) => self
                    .codec
                    .marshal(value)
                    .map(Some)
                    .map_err(ComputeError::Codec),
                None => Ok(None),
            },
        };

        self.apply_loaded(
            &item.key,
            loaded,
            item.loader.is_some(),
            item.skip_local,
            item.ttl,
            WriteMode::of(item),
        )
        .await
    }

    /// The type-erased tail of a write, shared by [`set_inner`] and the
    /// refresh engine: classify loader failures, then write local first
    /// and remote second.
    ///
    /// [`set_inner`]: Inner::set_inner
    pub(crate) async fn apply_loaded(
        &self,
        key: &str,
        loaded: Result<Option<Vec<u8>>, ComputeError>,
        had_loader: bool,
        skip_local: bool,
        ttl: Ttl,
        mode: WriteMode,
    ) -> Result<SetOutcome, CacheError> {
        if had_loader {
            self.stats.incr_query();
        }

        let bytes = match loaded {
            Ok(bytes) => bytes.unwrap_or_default(),
            Err(ComputeError::Codec(err)) => return Err(err),
            Err(ComputeError::Loader(err)) => {
                let cause: &(dyn std::error::Error + 'static) = err.as_ref();
                if (self.classify_not_found)(cause) {
                    if let Err(set_err) = self.set_not_found(key, skip_local).await {
                        tracing::error!(cache = %self.name, key, error = %set_err, "failed to store not-found placeholder");
                    }
                    return Ok(SetOutcome {
                        bytes: NOT_FOUND_PLACEHOLDER.to_vec(),
                        write_err: None,
                    });
                }
                let err = CacheError::loader(err);
                self.stats.incr_query_fail(&err);
                return Err(err);
            }
        };

        if !skip_local && let Some(local) = &self.local {
            local.set(key, bytes.clone());
        }

        let write_err = match &self.remote {
            None => {
                if self.local.is_none() {
                    Some(CacheError::BothNil)
                } else {
                    None
                }
            }
            Some(remote) => match ttl.resolve() {
                None => None,
                Some(ttl) => {
                    let written = match mode {
                        WriteMode::Xx => remote.set_xx(key, &bytes, ttl).await.map(|_| ()),
                        WriteMode::Nx => remote.set_nx(key, &bytes, ttl).await.map(|_| ()),
                        WriteMode::Ex => remote.set_ex(key, &bytes, ttl).await,
                    };
                    written.err()
                }
            },
        };

        Ok(SetOutcome { bytes, write_err })
    }

    /// Memoize "not found" for the key: placeholder into local, and into
    /// remote with `not_found_expiry` plus uniform jitter so bursts of
    /// missing keys do not expire in lockstep.
    pub(crate) async fn set_not_found(&self, key: &str, skip_local: bool) -> Result<(), CacheError> {
        if !skip_local && let Some(local) = &self.local {
            local.set(key, NOT_FOUND_PLACEHOLDER.to_vec());
        }

        match &self.remote {
            None => {
                if self.local.is_none() {
                    Err(CacheError::BothNil)
                } else {
                    Ok(())
                }
            }
            Some(remote) => {
                let ttl = self.not_found_expiry + crate::utils::jitter(self.offset);
                remote.set_ex(key, NOT_FOUND_PLACEHOLDER, ttl).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::local::{HashMapLocal, HashMapLocalConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn local_cache() -> Cache {
        Cache::builder("test")
            .local(Arc::new(HashMapLocal::new(HashMapLocalConfig::default())))
            .build()
    }

    fn nil_cache() -> Cache {
        Cache::builder("nil").build()
    }

    #[tokio::test]
    async fn test_both_nil() {
        let cache = nil_cache();

        let err = cache.get::<String>("key").await;
        assert!(matches!(err, Err(CacheError::BothNil)));

        let err = cache.delete("key").await;
        assert!(matches!(err, Err(CacheError::BothNil)));

        let err = cache
            .set(&Item::new("key").value("value".to_string()))
            .await;
        assert!(matches!(err, Err(CacheError::BothNil)));

        let err = cache.inner.set_not_found("key", false).await;
        assert!(matches!(err, Err(CacheError::BothNil)));
    }

    #[tokio::test]
    async fn test_both_nil_once_still_loads() {
        let cache = nil_cache();

        let value = cache
            .once::<String>(&Item::new("key").loader(|| async { Ok(Some("value".to_string())) }))
            .await
            .unwrap();
        assert_eq!(value, Some("value".to_string()));
    }

    #[tokio::test]
    async fn test_cache_type() {
        assert_eq!(nil_cache().cache_type(), CacheType::Local);
        assert_eq!(local_cache().cache_type(), CacheType::Local);
        assert_eq!(CacheType::Both.to_string(), "both");
        assert_eq!(CacheType::Remote.as_str(), "remote");
    }

    #[tokio::test]
    async fn test_roundtrip_and_delete() {
        let cache = local_cache();

        cache
            .set(&Item::new("mykey").value("myvalue".to_string()))
            .await
            .unwrap();
        assert_eq!(
            cache.get::<String>("mykey").await.unwrap(),
            Some("myvalue".to_string())
        );
        assert!(cache.exists("mykey").await);

        cache.delete("mykey").await.unwrap();
        let err = cache.get::<String>("mykey").await;
        assert!(matches!(err, Err(CacheError::CacheMiss)));
        assert!(!cache.exists("mykey").await);
    }

    #[tokio::test]
    async fn test_sets_without_value_reads_back_empty() {
        let cache = local_cache();

        cache.set(&Item::<String>::new("mykey")).await.unwrap();
        assert_eq!(cache.get::<String>("mykey").await.unwrap(), None);
        assert!(cache.exists("mykey").await);
    }

    #[tokio::test]
    async fn test_delete_from_local() {
        let cache = local_cache();

        cache
            .set(&Item::new("mykey").value("v".to_string()))
            .await
            .unwrap();
        cache.delete_from_local("mykey");
        assert!(!cache.exists("mykey").await);
    }

    #[tokio::test]
    async fn test_raw_bytes_and_strings() {
        let cache = local_cache();

        cache
            .set(&Item::new("str").value("str_value".to_string()))
            .await
            .unwrap();
        assert_eq!(
            cache.get::<String>("str").await.unwrap(),
            Some("str_value".to_string())
        );

        let payload: Vec<u8> = b"\x00binary\xff".to_vec();
        cache
            .set(&Item::new("bytes").value(payload.clone()))
            .await
            .unwrap();
        assert_eq!(cache.get::<Vec<u8>>("bytes").await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn test_once_not_found_is_negative_cached() {
        let cache = local_cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in_loader = calls.clone();
        let item: Item<String> = Item::new("missing").loader(move || {
            let calls = calls_in_loader.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Box::new(CacheError::NotFound) as LoadError)
            }
        });

        let err = cache.once(&item).await;
        assert!(matches!(err, Err(CacheError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Subsequent reads hit the placeholder without a loader.
        let err = cache.get::<String>("missing").await;
        assert!(matches!(err, Err(CacheError::NotFound)));
        assert!(!cache.exists("missing").await);

        // And a second once() is absorbed by the placeholder too.
        let err = cache.once(&item).await;
        assert!(matches!(err, Err(CacheError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_does_not_cache_loader_errors() {
        let cache = local_cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_in_loader = calls.clone();
        let failing: Item<u64> = Item::new("flaky").loader(move || {
            let calls = calls_in_loader.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("error stub".into())
            }
        });

        let err = cache.once(&failing).await;
        assert!(matches!(err, Err(CacheError::Loader(_))));

        let ok: Item<u64> = Item::new("flaky").loader(|| async { Ok(Some(42)) });
        assert_eq!(cache.once(&ok).await.unwrap(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_once_coalesces_concurrent_loads() {
        let cache = local_cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let item: Item<u64> = Item::new("herd").loader(move || {
                    let calls = calls.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(Some(42))
                    }
                });
                cache.once(&item).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Some(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let cache = local_cache();
        cache.close().await;
        cache.close().await;
    }
}
