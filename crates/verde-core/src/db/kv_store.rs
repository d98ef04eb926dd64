//! Durable key-value storage used by the offline queue

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

use super::Database;

/// String key-value storage that survives process restarts.
///
/// Both operations may fail on a storage-medium problem (disk full, I/O error).
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read the value stored under `key`, if any
    fn get_item(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Store `value` under `key`, replacing any previous value
    fn set_item(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;
}

/// libSQL implementation of `KeyValueStore`
pub struct LibSqlKeyValueStore {
    db: Database,
}

impl LibSqlKeyValueStore {
    /// Open (or create) the store at the given path
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: Database::open(path).await?,
        })
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory().await?,
        })
    }
}

impl KeyValueStore for LibSqlKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .db
            .connection()
            .query("SELECT value FROM kv_store WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let now = crate::util::unix_millis_now();
        self.db
            .connection()
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                libsql::params![key, value, now],
            )
            .await?;
        Ok(())
    }
}

/// In-memory `KeyValueStore` with switchable medium failures.
///
/// Clones share the same map, which lets tests simulate a process restart by
/// building a fresh queue over a clone.
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    items: Arc<Mutex<HashMap<String, String>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    failing_keys: Arc<Mutex<HashSet<String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail (or succeed again)
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make writes to a single key fail (or succeed again)
    pub fn set_fail_writes_to(&self, key: &str, fail: bool) {
        let mut failing = self
            .failing_keys
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if fail {
            failing.insert(key.to_string());
        } else {
            failing.remove(key);
        }
    }

    /// Overwrite a raw value, bypassing failure switches
    pub fn put_raw(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }

    /// Read a raw value, bypassing failure switches
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// All keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.lock().keys().cloned().collect::<Vec<_>>();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("read of '{key}' failed")));
        }
        Ok(self.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let key_fails = self
            .failing_keys
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(key);
        if key_fails || self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("write of '{key}' failed")));
        }
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_key_is_none() {
        let store = LibSqlKeyValueStore::open_in_memory().await.unwrap();
        assert_eq!(store.get_item("pendingReports").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_overwrites_value() {
        let store = LibSqlKeyValueStore::open_in_memory().await.unwrap();
        store.set_item("k", "one").await.unwrap();
        store.set_item("k", "two").await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_value_survives_reopen() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("queue.db");

        {
            let store = LibSqlKeyValueStore::open(&db_path).await.unwrap();
            store.set_item("k", "persisted").await.unwrap();
        }

        let store = LibSqlKeyValueStore::open(&db_path).await.unwrap();
        assert_eq!(
            store.get_item("k").await.unwrap().as_deref(),
            Some("persisted")
        );
    }

    #[tokio::test]
    async fn test_memory_store_failure_switches() {
        let store = MemoryKeyValueStore::new();
        store.set_item("k", "v").await.unwrap();

        store.set_fail_reads(true);
        assert!(store.get_item("k").await.is_err());
        store.set_fail_reads(false);

        store.set_fail_writes(true);
        assert!(store.set_item("k", "w").await.is_err());
        assert_eq!(store.raw("k").as_deref(), Some("v"));
        store.set_fail_writes(false);

        store.set_fail_writes_to("k", true);
        assert!(store.set_item("k", "w").await.is_err());
        store.set_item("other", "w").await.unwrap();
        assert_eq!(store.keys(), vec!["k".to_string(), "other".to_string()]);
    }
}
