use std::sync::Arc;

/// Error returned by the loader attached to an [`Item`](crate::Item).
///
/// Loaders report failures as boxed errors; the cache inspects the
/// source chain to decide whether a failure means "the value does not
/// exist" (see [`Builder::not_found_classifier`](crate::Builder::not_found_classifier)).
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for cache operations.
///
/// Results are shared between coalesced callers, so every variant is
/// cheaply cloneable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The key is absent from every configured tier.
    #[error("cache: key is missing")]
    CacheMiss,
    /// The value is known not to exist: either the loader reported it,
    /// or a not-found placeholder was read from a tier.
    #[error("cache: value not found")]
    NotFound,
    /// Neither a local nor a remote tier is configured.
    #[error("cache: both remote and local are nil")]
    BothNil,
    /// The user-supplied loader failed with an error that does not mean
    /// not-found.
    #[error("cache: loader failed: {0}")]
    Loader(#[source] Arc<dyn std::error::Error + Send + Sync>),
    /// Marshal or unmarshal failed.
    #[error("cache: codec: {0}")]
    Codec(String),
    /// The remote tier driver failed. The driver's native "key absent"
    /// signal is never reported here; it maps to [`CacheError::CacheMiss`].
    #[error("cache: remote: {0}")]
    Remote(String),
}

impl CacheError {
    pub(crate) fn loader(err: LoadError) -> Self {
        CacheError::Loader(Arc::from(err))
    }

    pub(crate) fn codec(message: impl ToString) -> Self {
        CacheError::Codec(message.to_string())
    }

    pub(crate) fn remote(message: impl ToString) -> Self {
        CacheError::Remote(message.to_string())
    }
}

/// Predicate deciding whether a loader error means "value does not
/// exist". Walks are over `&dyn Error`, so classifiers can inspect the
/// whole source chain.
pub type NotFoundClassifier =
    Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>;

/// Default classifier: the error or anything in its source chain is
/// [`CacheError::NotFound`]. A wrapped sentinel still counts.
pub fn default_not_found_classifier() -> NotFoundClassifier {
    Arc::new(|err| {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            if matches!(e.downcast_ref::<CacheError>(), Some(CacheError::NotFound)) {
                return true;
            }
            current = e.source();
        }
        false
    })
}
