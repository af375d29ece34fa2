//! Per-key in-flight call deduplication.
//!
//! Exactly one execution runs per key at a time within the process;
//! callers that arrive while a call is in flight wait for it and
//! receive a clone of the same outcome.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::watch;

pub(crate) struct Group<T> {
    flights: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

enum Role<T> {
    Leader(watch::Sender<Option<T>>),
    Waiter(watch::Receiver<Option<T>>),
}

/// Removes the flight entry when the leader finishes, including when its
/// future panics or is dropped mid-poll; waiters observe the closed
/// channel instead of parking forever.
struct Cleanup<'a, T> {
    group: &'a Group<T>,
    key: &'a str,
}

impl<T> Drop for Cleanup<'_, T> {
    fn drop(&mut self) {
        if let Ok(mut flights) = self.group.flights.lock() {
            flights.remove(self.key);
        }
    }
}

impl<T: Clone> Group<T> {
    pub(crate) fn new() -> Self {
        Group {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` for `key`, or wait for the execution already in flight.
    ///
    /// Returns `None` only when the in-flight leader vanished without
    /// publishing a result (its task was dropped or panicked).
    pub(crate) async fn work<F, Fut>(&self, key: &str, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let role = {
            let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
            match flights.entry(key.to_string()) {
                Entry::Occupied(entry) => Role::Waiter(entry.get().clone()),
                Entry::Vacant(slot) => {
                    let (tx, rx) = watch::channel(None);
                    slot.insert(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                let cleanup = Cleanup { group: self, key };
                let result = f().await;
                let _ = tx.send(Some(result.clone()));
                drop(cleanup);
                Some(result)
            }
            Role::Waiter(mut rx) => {
                loop {
                    {
                        let published = rx.borrow_and_update();
                        if let Some(result) = published.as_ref() {
                            return Some(result.clone());
                        }
                    }
                    if rx.changed().await.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_calls_run_once() {
        let group: Arc<Group<u64>> = Arc::new(Group::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let group = group.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                group
                    .work("mykey", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        42u64
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let group: Group<u64> = Group::new();
        let calls = AtomicUsize::new(0);

        for expected in 1..=3 {
            let got = group
                .work("mykey", || async {
                    calls.fetch_add(1, Ordering::SeqCst) as u64 + 1
                })
                .await;
            assert_eq!(got, Some(expected));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share() {
        let group: Arc<Group<&'static str>> = Arc::new(Group::new());

        let a = group.work("a", || async { "va" });
        let b = group.work("b", || async { "vb" });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a, Some("va"));
        assert_eq!(b, Some("vb"));
    }

    #[tokio::test]
    async fn test_waiters_observe_dropped_leader() {
        let group: Arc<Group<u64>> = Arc::new(Group::new());

        let leader = {
            let group = group.clone();
            tokio::spawn(async move {
                group
                    .work("mykey", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        1u64
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let group = group.clone();
            tokio::spawn(async move { group.work("mykey", || async { 2u64 }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        assert_eq!(waiter.await.unwrap(), None);

        // A later call finds no stale flight and runs normally.
        assert_eq!(group.work("mykey", || async { 3u64 }).await, Some(3));
    }
}
