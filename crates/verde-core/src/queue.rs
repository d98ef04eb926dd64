//! Durable FIFO of submissions waiting for remote confirmation.
//!
//! The queue is a JSON list stored under a single key of a [`KeyValueStore`].
//! Every read-modify-write runs under one async lock and removes by
//! [`ClientKey`], never by position, so an append racing a drain is never lost.
//! Unreadable contents degrade to an empty queue and are reported through
//! [`QueueEvent`] instead of failing the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::PoisonError;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::db::KeyValueStore;
use crate::error::{Error, Result};
use crate::models::{ClientKey, PendingSubmission, RejectedSubmission};
use crate::util::unix_millis_now;

/// Storage key of the pending list.
pub const QUEUE_KEY: &str = "pendingReports";
/// Storage key of terminally rejected submissions.
pub const REJECTED_KEY: &str = "pendingReports.rejected";

const EVENT_CAPACITY: usize = 16;

/// Side-effect notifications about degraded queue storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// Stored contents could not be decoded and were reset to empty.
    CorruptionRecovered {
        key: String,
        /// Where the unreadable value was copied, when the copy succeeded
        backup_key: Option<String>,
        reason: String,
    },
    /// The storage medium could not be read; the queue is treated as empty.
    ReadFailed { key: String, reason: String },
}

enum Decoded<T> {
    Items(Vec<T>),
    Corrupt { raw: String, reason: String },
}

/// Durable queue of [`PendingSubmission`]s plus the quarantine of rejected ones.
pub struct OfflineQueue<S: KeyValueStore> {
    store: S,
    write_lock: Mutex<()>,
    events: broadcast::Sender<QueueEvent>,
    read_degraded: AtomicBool,
    /// Corrupted keys whose reset has not landed yet, with their backup key
    unrecovered: std::sync::Mutex<HashMap<String, Option<String>>>,
}

impl<S: KeyValueStore> OfflineQueue<S> {
    pub fn new(store: S) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            write_lock: Mutex::new(()),
            events,
            read_degraded: AtomicBool::new(false),
            unrecovered: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to storage degradation events.
    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Persist a submission at the tail of the queue.
    ///
    /// Once this returns `Ok`, the submission survives a restart.
    pub async fn append(&self, item: PendingSubmission) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load_for_write::<PendingSubmission>(QUEUE_KEY).await?;
        if items.iter().any(|queued| queued.client_key == item.client_key) {
            tracing::debug!("Submission {} already queued", item.client_key);
            return Ok(());
        }
        items.push(item);
        self.save(QUEUE_KEY, &items).await?;
        tracing::info!("Queued submission offline ({} pending)", items.len());
        Ok(())
    }

    /// All pending submissions in insertion order.
    pub async fn list(&self) -> Vec<PendingSubmission> {
        self.load_for_read(QUEUE_KEY).await
    }

    /// Number of pending submissions.
    pub async fn len(&self) -> usize {
        self.list().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove a submission by key. Removing an absent key is a no-op.
    ///
    /// Returns whether an item was removed.
    pub async fn remove(&self, key: &ClientKey) -> Result<bool> {
        Ok(self.remove_confirmed(std::slice::from_ref(key)).await? > 0)
    }

    /// Re-read the current contents and drop only the given keys.
    ///
    /// Items appended since the caller took its snapshot are preserved.
    pub async fn remove_confirmed(&self, keys: &[ClientKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut items = self.load_for_write::<PendingSubmission>(QUEUE_KEY).await?;
        let before = items.len();
        items.retain(|item| !keys.contains(&item.client_key));
        let removed = before - items.len();

        if removed > 0 {
            self.save(QUEUE_KEY, &items).await?;
        }
        Ok(removed)
    }

    /// Atomically replace the whole pending list.
    pub async fn replace_all(&self, items: &[PendingSubmission]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save(QUEUE_KEY, items).await
    }

    /// Move a submission from the pending list into quarantine.
    pub async fn reject(&self, item: &PendingSubmission, reason: impl Into<String>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut rejected = self
            .load_for_write::<RejectedSubmission>(REJECTED_KEY)
            .await?;
        if !rejected
            .iter()
            .any(|entry| entry.submission.client_key == item.client_key)
        {
            rejected.push(RejectedSubmission {
                submission: item.clone(),
                reason: reason.into(),
                rejected_at: unix_millis_now(),
            });
            self.save(REJECTED_KEY, &rejected).await?;
        }

        let mut pending = self.load_for_write::<PendingSubmission>(QUEUE_KEY).await?;
        let before = pending.len();
        pending.retain(|queued| queued.client_key != item.client_key);
        if pending.len() != before {
            self.save(QUEUE_KEY, &pending).await?;
        }

        tracing::warn!(
            "Quarantined submission {} after remote rejection",
            item.client_key
        );
        Ok(())
    }

    /// Submissions the remote store refused permanently.
    pub async fn rejected(&self) -> Vec<RejectedSubmission> {
        self.load_for_read(REJECTED_KEY).await
    }

    /// Move a quarantined submission back to the tail of the pending list.
    ///
    /// The client key is kept, so a later drain still writes it at most once.
    pub async fn requeue(&self, key: &ClientKey) -> Result<PendingSubmission> {
        let _guard = self.write_lock.lock().await;

        let mut rejected = self
            .load_for_write::<RejectedSubmission>(REJECTED_KEY)
            .await?;
        let position = rejected
            .iter()
            .position(|entry| entry.submission.client_key == *key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        let entry = rejected.remove(position);

        let mut pending = self.load_for_write::<PendingSubmission>(QUEUE_KEY).await?;
        if !pending.iter().any(|queued| queued.client_key == *key) {
            pending.push(entry.submission.clone());
            self.save(QUEUE_KEY, &pending).await?;
        }
        self.save(REJECTED_KEY, &rejected).await?;

        tracing::info!("Requeued submission {key}");
        Ok(entry.submission)
    }

    async fn load_for_read<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        match self.read::<T>(key).await {
            Ok(Decoded::Items(items)) => items,
            Ok(Decoded::Corrupt { .. }) => {
                let _guard = self.write_lock.lock().await;
                // Another task may have repaired it while we waited
                self.load_for_write(key).await.unwrap_or_default()
            }
            Err(_) => Vec::new(),
        }
    }

    async fn load_for_write<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        match self.read::<T>(key).await? {
            Decoded::Items(items) => Ok(items),
            Decoded::Corrupt { raw, reason } => {
                self.recover_corrupt(key, &raw, reason).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Decoded<T>> {
        let raw = match self.store.get_item(key).await {
            Ok(raw) => {
                self.read_degraded.store(false, Ordering::SeqCst);
                raw
            }
            Err(error) => {
                if !self.read_degraded.swap(true, Ordering::SeqCst) {
                    tracing::warn!("Failed to read offline queue '{key}': {error}; treating as empty");
                    self.emit(QueueEvent::ReadFailed {
                        key: key.to_string(),
                        reason: error.to_string(),
                    });
                }
                return Err(error);
            }
        };

        let Some(raw) = raw else {
            return Ok(Decoded::Items(Vec::new()));
        };
        if raw.trim().is_empty() {
            return Ok(Decoded::Items(Vec::new()));
        }

        match serde_json::from_str::<Vec<T>>(&raw) {
            Ok(items) => Ok(Decoded::Items(items)),
            Err(error) => Ok(Decoded::Corrupt {
                raw,
                reason: error.to_string(),
            }),
        }
    }

    /// Back up and reset a corrupted value.
    ///
    /// The event fires on first detection even when the reset fails, and a
    /// backup is written at most once until the reset lands.
    async fn recover_corrupt(&self, key: &str, raw: &str, reason: String) -> Result<()> {
        let known = self.unrecovered().get(key).cloned();
        let first_seen = known.is_none();

        let backup_key = match known.flatten() {
            Some(backup_key) => Some(backup_key),
            None => self.back_up(key, raw, first_seen).await,
        };
        self.unrecovered()
            .insert(key.to_string(), backup_key.clone());

        if first_seen {
            tracing::warn!(
                "Offline queue '{key}' was corrupted ({reason}); treating as empty, backup: {}",
                backup_key.as_deref().unwrap_or("none")
            );
            self.emit(QueueEvent::CorruptionRecovered {
                key: key.to_string(),
                backup_key,
                reason,
            });
        }

        if let Err(error) = self.store.set_item(key, "[]").await {
            if first_seen {
                tracing::warn!("Failed to reset corrupted queue '{key}': {error}");
            }
            return Err(error);
        }
        if !first_seen {
            tracing::info!("Corrupted queue '{key}' reset to empty");
        }
        self.unrecovered().remove(key);
        Ok(())
    }

    async fn back_up(&self, key: &str, raw: &str, log_failure: bool) -> Option<String> {
        let backup_key = format!("{key}.corrupt-{}", unix_millis_now());
        match self.store.set_item(&backup_key, raw).await {
            Ok(()) => Some(backup_key),
            Err(error) => {
                if log_failure {
                    tracing::warn!("Failed to back up corrupted queue '{key}': {error}");
                }
                None
            }
        }
    }

    fn unrecovered(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<String>>> {
        self.unrecovered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn save<T: Serialize>(&self, key: &str, items: &[T]) -> Result<()> {
        let raw = serde_json::to_string(items)?;
        self.store.set_item(key, &raw).await
    }

    fn emit(&self, event: QueueEvent) {
        // No receivers is fine; the warning has been logged already
        let _ = self.events.send(event);
    }
}
