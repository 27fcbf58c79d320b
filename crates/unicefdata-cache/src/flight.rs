//! Single-flight keyed cache.
//!
//! [`SingleFlight`] maps keys to lazily loaded values. Concurrent callers
//! asking for the same key while its load is running wait on that load
//! instead of starting their own; callers for different keys never wait on
//! each other beyond a short map lookup.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::trace;

/// Outcome of a load, published once to every caller waiting on it.
type Outcome<V, E> = Option<Result<Arc<V>, E>>;

struct Loaded<V> {
    value: Arc<V>,
    loaded_at: Instant,
}

enum Slot<V, E> {
    /// A load is running; `id` tells it apart from later loads of the key.
    Loading {
        id: u64,
        outcome: watch::Receiver<Outcome<V, E>>,
    },
    Loaded(Loaded<V>),
}

impl<V, E> Slot<V, E> {
    fn loaded(&self) -> Option<&Loaded<V>> {
        match self {
            Self::Loaded(loaded) => Some(loaded),
            Self::Loading { .. } => None,
        }
    }

    fn is_flight(&self, flight: u64) -> bool {
        matches!(self, Self::Loading { id, .. } if *id == flight)
    }
}

/// Keyed cache with at most one in-flight load per key.
///
/// Callers arriving while a load runs receive that load's outcome, error
/// included. A failed load leaves the key unloaded, so the next caller tries
/// again. Invalidation swaps the key's slot out under the map lock, so
/// readers see either the value loaded before the invalidation or a fresh
/// load, never a mix; a load finishing after its key was invalidated still
/// answers its waiters but is not stored.
pub struct SingleFlight<K, V, E> {
    slots: Mutex<HashMap<K, Slot<V, E>>>,
    next_flight: AtomicU64,
}

impl<K, V, E> fmt::Debug for SingleFlight<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots();
        let loaded = slots.values().filter(|s| s.loaded().is_some()).count();
        f.debug_struct("SingleFlight")
            .field("loaded", &loaded)
            .field("in_flight", &(slots.len() - loaded))
            .finish()
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
        }
    }
}

impl<K, V, E> SingleFlight<K, V, E> {
    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V, E>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    E: Clone,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the running load of `key`, or runs `load` if there is none.
    async fn run<F, Fut>(&self, key: &K, retain: bool, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let (flight, publish) = loop {
            let (flight, mut outcome) = {
                let mut slots = self.slots();
                match slots.get(key) {
                    Some(Slot::Loaded(loaded)) => return Ok(Arc::clone(&loaded.value)),
                    Some(Slot::Loading { id, outcome }) => (*id, outcome.clone()),
                    None => {
                        let flight = self.next_flight.fetch_add(1, Ordering::Relaxed);
                        let (publish, outcome) = watch::channel(None);
                        slots.insert(key.clone(), Slot::Loading { id: flight, outcome });
                        break (flight, publish);
                    }
                }
            };

            trace!(flight, "waiting on in-flight load");
            let shared = outcome
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|seen| seen.clone());
            if let Some(result) = shared {
                return result;
            }

            // The loading caller went away before finishing; take over.
            let mut slots = self.slots();
            if slots.get(key).is_some_and(|s| s.is_flight(flight)) {
                slots.remove(key);
            }
        };

        trace!(flight, "single-flight load started");
        let result = load().await.map(Arc::new);
        {
            let mut slots = self.slots();
            if slots.get(key).is_some_and(|s| s.is_flight(flight)) {
                match &result {
                    Ok(value) if retain => {
                        slots.insert(
                            key.clone(),
                            Slot::Loaded(Loaded {
                                value: Arc::clone(value),
                                loaded_at: Instant::now(),
                            }),
                        );
                    }
                    _ => {
                        slots.remove(key);
                    }
                }
            }
        }
        publish.send_replace(Some(result.clone()));
        result
    }

    /// Returns the cached value for `key`, loading it with `load` if absent.
    ///
    /// # Errors
    /// Returns the loader's error, to this caller and to every caller that
    /// joined the same load; nothing is cached in that case.
    pub async fn get_or_try_load<F, Fut>(&self, key: &K, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.run(key, true, load).await
    }

    /// Runs `load` for `key` unless a run for the same key is already in
    /// flight, in which case the result of that run is shared.
    ///
    /// Unlike [`SingleFlight::get_or_try_load`] the result is not retained
    /// once the run completes.
    ///
    /// # Errors
    /// Returns the loader's error.
    pub async fn coalesce<F, Fut>(&self, key: &K, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.run(key, false, load).await
    }

    /// Returns the value for `key` if it is loaded, without loading it.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.slots()
            .get(key)
            .and_then(Slot::loaded)
            .map(|l| Arc::clone(&l.value))
    }

    /// Forgets `key`. Does not trigger a reload.
    ///
    /// Returns true if a loaded value was dropped.
    pub fn invalidate(&self, key: &K) -> bool {
        self.slots()
            .remove(key)
            .is_some_and(|slot| slot.loaded().is_some())
    }

    /// Forgets every key matching `predicate`. Returns the number of loaded
    /// values dropped.
    pub fn invalidate_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut slots = self.slots();
        let before = slots.values().filter(|s| s.loaded().is_some()).count();
        slots.retain(|k, _| !predicate(k));
        before - slots.values().filter(|s| s.loaded().is_some()).count()
    }

    /// Forgets every key.
    pub fn clear(&self) {
        self.slots().clear();
    }

    /// Number of loaded keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots().values().filter(|s| s.loaded().is_some()).count()
    }

    /// Returns true if nothing is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of the oldest loaded value.
    #[must_use]
    pub fn oldest_age(&self) -> Option<Duration> {
        self.slots()
            .values()
            .filter_map(|s| s.loaded().map(|l| l.loaded_at.elapsed()))
            .max()
    }

    /// Loaded values, in no particular order.
    #[must_use]
    pub fn values(&self) -> Vec<Arc<V>> {
        self.slots()
            .values()
            .filter_map(|s| s.loaded().map(|l| Arc::clone(&l.value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_loads_once_then_serves_cached() {
        let cache: SingleFlight<String, u32, String> = SingleFlight::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_try_load(&"a".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(7)
                })
                .await
                .unwrap();
            assert_eq!(*value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.oldest_age().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let cache: Arc<SingleFlight<String, u32, String>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_try_load(&"k".to_string(), || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, String>(42)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(*task.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache: SingleFlight<&'static str, u32, &'static str> = SingleFlight::new();
        let err = cache
            .get_or_try_load(&"k", || async { Err::<u32, _>("boom") })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");
        assert!(cache.get(&"k").is_none());

        let value = cache
            .get_or_try_load(&"k", || async { Ok::<_, &str>(1) })
            .await
            .unwrap();
        assert_eq!(*value, 1);
    }

    #[tokio::test]
    async fn test_invalidate_does_not_reload() {
        let cache: SingleFlight<&'static str, u32, ()> = SingleFlight::new();
        cache
            .get_or_try_load(&"a", || async { Ok::<_, ()>(1) })
            .await
            .unwrap();
        cache
            .get_or_try_load(&"b", || async { Ok::<_, ()>(2) })
            .await
            .unwrap();

        assert!(cache.invalidate(&"a"));
        assert!(cache.get(&"a").is_none());
        assert_eq!(cache.get(&"b").as_deref(), Some(&2));

        assert_eq!(cache.invalidate_where(|k| *k == "b"), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_coalesce_forgets_after_completion() {
        let cache: SingleFlight<&'static str, u32, ()> = SingleFlight::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            cache
                .coalesce(&"k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(5)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.get(&"k").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_failure() {
        let cache: Arc<SingleFlight<String, u32, String>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_try_load(&"k".to_string(), || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Err::<u32, _>("unavailable".to_string())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap_err(), "unavailable");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        // Later callers load again.
        let value = cache
            .get_or_try_load(&"k".to_string(), || async { Ok::<_, String>(3) })
            .await
            .unwrap();
        assert_eq!(*value, 3);
    }

    #[tokio::test]
    async fn test_abandoned_load_is_taken_over() {
        let cache: Arc<SingleFlight<&'static str, u32, ()>> = Arc::new(SingleFlight::new());

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_try_load(&"k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_try_load(&"k", || async { Ok(2) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        leader.abort();

        assert_eq!(*follower.await.unwrap().unwrap(), 2);
        assert_eq!(cache.get(&"k").as_deref(), Some(&2));
    }
}
