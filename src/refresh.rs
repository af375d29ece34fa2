//! Background refresh engine.
//!
//! `once` registers keys here; a single ticker wakes every refresh
//! interval, reclaims tasks that have gone idle, and dispatches the rest
//! onto a bounded permit pool. With a remote tier configured, a
//! best-effort distributed lock elects one node per cycle to reload from
//! origin while the others mirror the remote tier into their local one.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;

use crate::cache::{ComputeError, Inner, WriteMode};
use crate::codec::Codec;
use crate::error::CacheError;
use crate::item::{Item, Ttl};
use crate::utils::now_ms;

/// Suffix of the per-key distributed refresh lock. The lock value is the
/// leader's unix time in seconds; its TTL is one refresh interval, so a
/// crashed leader frees the next cycle automatically.
pub(crate) const LOCK_KEY_SUFFIX: &str = "_#RL#";

type ComputeFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Option<Vec<u8>>, ComputeError>> + Send + Sync>;

/// One registered key: how to reproduce its bytes, plus the bookkeeping
/// for idle reclamation. Owned by the task registry, exactly one per key.
pub(crate) struct RefreshTask {
    pub(crate) key: String,
    ttl: Ttl,
    skip_local: bool,
    has_loader: bool,
    /// Unix millis of the most recent `once` for this key.
    last_access: AtomicI64,
    compute: ComputeFn,
}

impl RefreshTask {
    /// Derive a task from an item, erasing the value type: the user
    /// loader and the codec are composed into a byte-producing closure.
    fn from_item<T>(item: &Item<T>, codec: Codec) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        let compute: ComputeFn = match &item.loader {
            Some(loader) => {
                let loader = loader.clone();
                Arc::new(move || {
                    let loader = loader.clone();
                    let fut: BoxFuture<'static, Result<Option<Vec<u8>>, ComputeError>> =
                        Box::pin(async move {
                            match loader().await {
                                Ok(Some(value)) => codec
                                    .marshal(&value)
                                    .map(Some)
                                    .map_err(ComputeError::Codec),
                                Ok(None) => Ok(None),
                                Err(err) => Err(ComputeError::Loader(err)),
                            }
                        });
                    fut
                })
            }
            None => Arc::new(|| {
                let fut: BoxFuture<'static, Result<Option<Vec<u8>>, ComputeError>> =
                    Box::pin(async { Ok(None) });
                fut
            }),
        };

        RefreshTask {
            key: item.key.clone(),
            ttl: item.ttl,
            skip_local: item.skip_local,
            has_loader: item.loader.is_some(),
            last_access: AtomicI64::new(now_ms()),
            compute,
        }
    }

    fn touch(&self) {
        self.last_access.store(now_ms(), Ordering::Relaxed);
    }

    fn last_access_ms(&self) -> i64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

impl Inner {
    /// Register the item's key for refresh, or renew its last-access
    /// time. The registry entry API makes insert-or-get atomic, so a
    /// racing pair of calls never produces two tasks for one key.
    pub(crate) fn add_or_update_refresh_task<T>(&self, item: &Item<T>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        if self.refresh_duration.is_zero() || !item.refresh {
            return;
        }

        match self.tasks.entry(item.key.clone()) {
            Entry::Occupied(entry) => entry.get().touch(),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RefreshTask::from_item(item, self.codec)));
            }
        }
    }

    /// Run the task's loader and push the result through the regular
    /// write path (local first, then remote with the task's TTL).
    async fn reload_origin(&self, task: &RefreshTask) -> Result<(), CacheError> {
        let loaded = (task.compute)().await;
        let outcome = self
            .apply_loaded(
                &task.key,
                loaded,
                task.has_loader,
                task.skip_local,
                task.ttl,
                WriteMode::Ex,
            )
            .await?;
        match outcome.write_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Start the ticker driving periodic refresh. The loop holds only a weak
/// handle: dropping the last `Cache` clone ends it, as does `close`.
pub(crate) fn spawn_ticker(inner: &Arc<Inner>) {
    let weak = Arc::downgrade(inner);
    let mut stop_rx = inner.stop_tx.subscribe();
    let period = inner.refresh_duration;
    let concurrency = inner.refresh_concurrency;

    tokio::spawn(async move {
        let sem = Arc::new(Semaphore::new(concurrency));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(inner) = weak.upgrade() else { break };
                    tick(&inner, &sem).await;
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
}

async fn tick(inner: &Arc<Inner>, sem: &Arc<Semaphore>) {
    let _guard = inner.tick_lock.lock().await;

    // Capture now once, before iterating: tasks queued behind the permit
    // pool must not age into the idle window while they wait.
    let now = now_ms();
    let idle_limit = inner.stop_refresh_after_last_access.as_millis() as i64;

    let snapshot: Vec<(String, Arc<RefreshTask>)> = inner
        .tasks
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();

    for (key, task) in snapshot {
        if now - task.last_access_ms() > idle_limit {
            tracing::debug!(cache = %inner.name, key = %key, "cancel refresh task");
            inner.tasks.remove(&key);
            continue;
        }

        // The permit pool is never closed while the ticker runs, and the
        // acquire cannot be cancelled by any caller deadline.
        let permit = match sem.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                tracing::error!(cache = %inner.name, key = %key, error = %err, "refresh permit unavailable");
                continue;
            }
        };

        let inner = inner.clone();
        tokio::spawn(async move {
            let _permit = permit;
            tracing::debug!(cache = %inner.name, key = %task.key, "start refresh");
            if inner.remote.is_some() {
                external_load(&inner, &task, now).await;
            } else {
                load(&inner, &task).await;
            }
        });
    }
}

/// Local-only refresh: reload from origin into the local tier.
async fn load(inner: &Inner, task: &RefreshTask) {
    if let Err(err) = inner.reload_origin(task).await {
        tracing::error!(cache = %inner.name, key = %task.key, error = %err, "refresh reload failed");
    }
}

/// Fleet-coordinated refresh: elect a leader through the lock key, let
/// it reload from origin, and have everyone else mirror the remote tier
/// locally.
async fn external_load(inner: &Arc<Inner>, task: &Arc<RefreshTask>, now: i64) {
    let Some(remote) = inner.remote.clone() else {
        return;
    };
    let lock_key = format!("{}{}", task.key, LOCK_KEY_SUFFIX);

    let should_load = match remote.get(&lock_key).await {
        Ok(None) => true,
        Ok(Some(_)) => false,
        Err(err) => {
            tracing::error!(cache = %inner.name, key = %lock_key, error = %err, "refresh lock probe failed");
            return;
        }
    };

    if !should_load {
        schedule_local_refresh(inner, task);
        return;
    }

    let lock_value = (now / 1000).to_string();
    match remote
        .set_nx(&lock_key, lock_value.as_bytes(), inner.refresh_duration)
        .await
    {
        Ok(true) => {
            if let Err(err) = inner.reload_origin(task).await {
                tracing::error!(cache = %inner.name, key = %task.key, error = %err, "refresh reload failed");
            }
        }
        Ok(false) => schedule_local_refresh(inner, task),
        Err(err) => {
            tracing::error!(cache = %inner.name, key = %lock_key, error = %err, "refresh lock acquire failed");
        }
    }
}

/// Follower path: wait a fraction of the interval so the leader can
/// populate the remote tier, then copy its bytes into the local tier.
fn schedule_local_refresh(inner: &Arc<Inner>, task: &Arc<RefreshTask>) {
    if inner.local.is_none() {
        return;
    }

    let inner = inner.clone();
    let task = task.clone();
    let delay = inner.refresh_duration / 5;
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        refresh_local(&inner, &task).await;
    });
}

async fn refresh_local(inner: &Inner, task: &RefreshTask) {
    let (Some(remote), Some(local)) = (&inner.remote, &inner.local) else {
        return;
    };

    match remote.get(&task.key).await {
        Ok(Some(b)) => local.set(&task.key, b),
        Ok(None) => {
            tracing::debug!(cache = %inner.name, key = %task.key, "nothing to mirror during local refresh");
        }
        Err(err) => {
            tracing::error!(cache = %inner.name, key = %task.key, error = %err, "local refresh read failed");
        }
    }
}
