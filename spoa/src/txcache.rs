use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time;

struct Entry<V> {
    value: V,
    deadline: Instant,
}

/// A TTL map with an eviction callback, no per-key timers.
///
/// Grounded in `original_source/coraza-spoa/internal/application.go`'s
/// `cache.NewTTLWithCallback(ttl, evictionInterval, callback)`: a fixed 1s
/// sweep scans for entries whose deadline has passed, removes them, and
/// invokes the callback with the removed value — exactly once per insertion,
/// since removal and callback dispatch happen together under the same
/// atomic `remove_if`. `dashmap` is reused here the same way the teacher
/// reuses it for its own per-stream connection maps.
pub struct TxCache<V> {
    entries: DashMap<String, Entry<V>>,
}

impl<V> TxCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(TxCache {
            entries: DashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or refreshes `key`'s value and deadline.
    pub fn set_with_expiration<K: Into<String>>(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                deadline: Instant::now() + ttl,
            },
        );
    }

    /// Reads without removing or refreshing the deadline.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Atomic take-out; idempotent (a second call after success is a no-op).
    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, e)| e.value)
    }

    /// Spawns the fixed-interval eviction sweep. The returned handle lets
    /// the agent runtime cancel the sweep when an `Application` is dropped.
    pub fn spawn_eviction<F>(self: &Arc<Self>, interval: Duration, on_evict: F) -> JoinHandle<()>
    where
        F: Fn(String, V) + Send + Sync + 'static,
    {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // the first tick fires immediately; skip it

            loop {
                ticker.tick().await;

                let now = Instant::now();
                let expired: Vec<String> = cache
                    .entries
                    .iter()
                    .filter(|e| e.deadline <= now)
                    .map(|e| e.key().clone())
                    .collect();

                for key in expired {
                    if let Some((key, entry)) =
                        cache.entries.remove_if(&key, |_, e| e.deadline <= now)
                    {
                        on_evict(key, entry.value);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_get_remove_roundtrip() {
        let cache: Arc<TxCache<u32>> = TxCache::new();

        cache.set_with_expiration("a", 1, Duration::from_secs(30));
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None, "remove is idempotent");
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_expired_entries_exactly_once() {
        let cache: Arc<TxCache<u32>> = TxCache::new();
        let evictions = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        cache.set_with_expiration("a", 42, Duration::from_millis(10));

        let recorded = Arc::clone(&evictions);
        let count = Arc::clone(&calls);
        let handle = cache.spawn_eviction(Duration::from_millis(10), move |key, value| {
            count.fetch_add(1, Ordering::SeqCst);
            recorded.lock().unwrap().push((key, value));
        });

        time::advance(Duration::from_millis(50)).await;
        time::sleep(Duration::from_millis(1)).await;

        assert!(cache.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(evictions.lock().unwrap().as_slice(), [("a".to_string(), 42)]);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn remove_before_sweep_wins_the_race() {
        let cache: Arc<TxCache<u32>> = TxCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.set_with_expiration("a", 1, Duration::from_millis(10));

        let count = Arc::clone(&calls);
        let handle = cache.spawn_eviction(Duration::from_millis(10), move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(cache.remove("a"), Some(1));

        time::advance(Duration::from_millis(50)).await;
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);

        handle.abort();
    }
}
