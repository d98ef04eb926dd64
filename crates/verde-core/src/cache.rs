//! Time-bounded memoization for slow-changing remote catalogs.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Keyed cache whose entries expire after a per-call TTL.
///
/// Concurrent callers for a cold key wait for a single loader run.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, running `loader` when it is
    /// missing or expired. Loader errors are returned and nothing is cached.
    pub async fn get_or_populate<F, Fut, E>(&self, key: K, ttl: Duration, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if let Some(entry) = entries.get(&key) {
            if entry.expires_at > now {
                return Ok(entry.value.clone());
            }
        }

        let value = loader().await?;
        entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(value)
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.lock().await.remove(key);
    }

    pub async fn invalidate_all(&self) {
        self.entries.lock().await.clear();
    }
}
