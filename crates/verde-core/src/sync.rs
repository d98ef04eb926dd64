//! Drains the offline queue into the remote store.
//!
//! A drain is single-flight: while one runs, further calls return
//! [`DrainReport::Skipped`]. Items are written one at a time in FIFO order and
//! removed by client key as soon as the remote store confirms them. There is
//! no internal retry loop; failed items wait for the next drain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::connectivity::ConnectivityMonitor;
use crate::db::KeyValueStore;
use crate::models::{ClientKey, ReportId};
use crate::queue::OfflineQueue;
use crate::remote::{RemoteError, RemoteSink};

/// Default upper bound for a single remote write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one remote write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Committed(ReportId),
    Failed(RemoteError),
}

/// Outcome of one queued item within a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub client_key: ClientKey,
    pub outcome: SyncOutcome,
    /// The item was moved to quarantine
    pub quarantined: bool,
}

/// Per-item results of a completed drain, in queue order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub items: Vec<ItemOutcome>,
}

impl DrainSummary {
    pub fn committed(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, SyncOutcome::Committed(_)))
            .count()
    }

    /// Items that stay queued for the next drain.
    pub fn retained(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, SyncOutcome::Failed(_)) && !item.quarantined)
            .count()
    }

    pub fn quarantined(&self) -> usize {
        self.items.iter().filter(|item| item.quarantined).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainReport {
    /// Another drain was already running
    Skipped,
    Completed(DrainSummary),
}

impl DrainReport {
    pub const fn summary(&self) -> Option<&DrainSummary> {
        match self {
            Self::Skipped => None,
            Self::Completed(summary) => Some(summary),
        }
    }
}

/// Clears the in-flight flag on every exit path, including cancellation.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Moves queued submissions into a [`RemoteSink`].
pub struct SyncProcessor<S: KeyValueStore, R: RemoteSink> {
    queue: Arc<OfflineQueue<S>>,
    sink: Arc<R>,
    write_timeout: Duration,
    in_flight: AtomicBool,
    /// Written remotely but not yet removed locally
    committed: Mutex<HashMap<ClientKey, ReportId>>,
}

impl<S: KeyValueStore, R: RemoteSink> SyncProcessor<S, R> {
    pub fn new(queue: Arc<OfflineQueue<S>>, sink: Arc<R>) -> Self {
        Self {
            queue,
            sink,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            in_flight: AtomicBool::new(false),
            committed: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub const fn queue(&self) -> &Arc<OfflineQueue<S>> {
        &self.queue
    }

    pub fn is_draining(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Attempt every queued submission once.
    pub async fn drain(&self) -> DrainReport {
        let Some(_guard) = DrainGuard::acquire(&self.in_flight) else {
            tracing::debug!("Drain already in progress; skipping");
            return DrainReport::Skipped;
        };

        let items = self.queue.list().await;
        if items.is_empty() {
            return DrainReport::Completed(DrainSummary::default());
        }
        tracing::info!("Draining {} queued submission(s)", items.len());

        let mut summary = DrainSummary::default();
        for item in items {
            let client_key = item.client_key;

            if let Some(id) = self.committed_id(&client_key) {
                tracing::debug!("Submission {client_key} already committed as {id}");
                self.forget_if_removed(client_key).await;
                summary.items.push(ItemOutcome {
                    client_key,
                    outcome: SyncOutcome::Committed(id),
                    quarantined: false,
                });
                continue;
            }

            let result = match tokio::time::timeout(self.write_timeout, self.sink.write(client_key, &item.payload)).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout(self.write_timeout)),
            };

            let outcome = match result {
                Ok(id) => {
                    self.remember_committed(client_key, id.clone());
                    self.forget_if_removed(client_key).await;
                    tracing::info!("Submission {client_key} committed as {id}");
                    ItemOutcome {
                        client_key,
                        outcome: SyncOutcome::Committed(id),
                        quarantined: false,
                    }
                }
                Err(error) if !error.is_retryable() => {
                    let quarantined = match self.queue.reject(&item, error.to_string()).await {
                        Ok(()) => true,
                        Err(storage_error) => {
                            tracing::error!(
                                "Failed to quarantine submission {client_key}: {storage_error}"
                            );
                            false
                        }
                    };
                    ItemOutcome {
                        client_key,
                        outcome: SyncOutcome::Failed(error),
                        quarantined,
                    }
                }
                Err(error) => {
                    tracing::warn!("Submission {client_key} not sent, will retry: {error}");
                    ItemOutcome {
                        client_key,
                        outcome: SyncOutcome::Failed(error),
                        quarantined: false,
                    }
                }
            };
            summary.items.push(outcome);
        }

        tracing::info!(
            committed = summary.committed(),
            retained = summary.retained(),
            quarantined = summary.quarantined(),
            "Drain finished"
        );
        DrainReport::Completed(summary)
    }

    fn committed_id(&self, key: &ClientKey) -> Option<ReportId> {
        self.committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remember_committed(&self, key: ClientKey, id: ReportId) {
        self.committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, id);
    }

    async fn forget_if_removed(&self, key: ClientKey) {
        match self.queue.remove(&key).await {
            Ok(_) => {
                self.committed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&key);
            }
            Err(error) => {
                tracing::warn!("Committed submission {key} could not be removed locally: {error}");
            }
        }
    }
}

/// Background task draining on every reconnect; dropping it stops the task.
pub struct AutoDrainHandle {
    task: JoinHandle<()>,
}

impl AutoDrainHandle {
    pub fn stop(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for AutoDrainHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Drain now if already online, then on every `offline -> online` edge.
///
/// Must be called inside a tokio runtime.
pub fn spawn_auto_drain<S, R>(
    monitor: &ConnectivityMonitor,
    processor: Arc<SyncProcessor<S, R>>,
) -> AutoDrainHandle
where
    S: KeyValueStore,
    R: RemoteSink,
{
    let mut subscription = monitor.subscribe();
    let online = monitor.is_online();

    let task = tokio::spawn(async move {
        if online {
            processor.drain().await;
        }
        while subscription.recv().await.is_some() {
            processor.drain().await;
        }
        tracing::debug!("Connectivity monitor closed; auto drain stopped");
    });

    AutoDrainHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::Connectivity;
    use crate::db::MemoryKeyValueStore;
    use crate::models::{PendingSubmission, ReportPayload};
    use crate::remote::{MemoryRemote, MemoryRemoteClient};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    async fn queue_with(descriptions: &[&str]) -> Arc<OfflineQueue<MemoryKeyValueStore>> {
        let queue = Arc::new(OfflineQueue::new(MemoryKeyValueStore::new()));
        for description in descriptions {
            queue
                .append(PendingSubmission::new(
                    ReportPayload::new("Baches").with_description(*description),
                ))
                .await
                .unwrap();
        }
        queue
    }

    fn descriptions(payloads: &[ReportPayload]) -> Vec<&str> {
        payloads.iter().map(|p| p.description.as_str()).collect()
    }

    /// Sink that fails retryably for selected descriptions.
    struct FlakySink {
        inner: MemoryRemoteClient,
        failing: Mutex<HashSet<String>>,
    }

    impl FlakySink {
        fn new(remote: &MemoryRemote, failing: &[&str]) -> Self {
            Self {
                inner: remote.client(),
                failing: Mutex::new(failing.iter().map(|s| (*s).to_string()).collect()),
            }
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }
    }

    impl RemoteSink for FlakySink {
        async fn write(&self, key: ClientKey, payload: &ReportPayload) -> Result<ReportId, RemoteError> {
            if self.failing.lock().unwrap().contains(&payload.description) {
                return Err(RemoteError::Unreachable("connection reset".to_string()));
            }
            self.inner.write(key, payload).await
        }
    }

    #[tokio::test]
    async fn drain_writes_items_in_fifo_order() {
        let queue = queue_with(&["A", "B", "C"]).await;
        let remote = MemoryRemote::new();
        let processor = SyncProcessor::new(queue.clone(), Arc::new(remote.client()));

        let report = processor.drain().await;
        assert_eq!(report.summary().unwrap().committed(), 3);
        assert_eq!(descriptions(&remote.accepted_writes()), vec!["A", "B", "C"]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn failed_item_is_the_only_one_retried() {
        let queue = queue_with(&["A", "B", "C"]).await;
        let remote = MemoryRemote::new();
        let sink = Arc::new(FlakySink::new(&remote, &["B"]));
        let processor = SyncProcessor::new(queue.clone(), sink.clone());

        let first = processor.drain().await;
        let summary = first.summary().unwrap();
        assert_eq!(summary.committed(), 2);
        assert_eq!(summary.retained(), 1);
        let remaining = queue.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].payload.description, "B");

        sink.heal();
        let second = processor.drain().await;
        assert_eq!(second.summary().unwrap().items.len(), 1);
        assert_eq!(descriptions(&remote.accepted_writes()), vec!["A", "C", "B"]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_drains_are_single_flight() {
        let queue = queue_with(&["A", "B"]).await;
        let remote = MemoryRemote::new();
        remote.set_write_delay(Duration::from_millis(50));
        let processor = Arc::new(SyncProcessor::new(queue.clone(), Arc::new(remote.client())));

        let (first, second) = tokio::join!(processor.drain(), processor.drain());
        let skipped = [&first, &second]
            .iter()
            .filter(|report| ***report == DrainReport::Skipped)
            .count();

        assert_eq!(skipped, 1);
        assert_eq!(remote.write_attempts(), 2);
        assert!(!processor.is_draining());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn cancelled_drain_releases_the_flag() {
        let queue = queue_with(&["A"]).await;
        let remote = MemoryRemote::new();
        remote.set_write_delay(Duration::from_secs(5));
        let processor = SyncProcessor::new(queue.clone(), Arc::new(remote.client()));

        let cancelled = tokio::time::timeout(Duration::from_millis(20), processor.drain()).await;
        assert!(cancelled.is_err());
        assert!(!processor.is_draining());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn rejected_items_are_quarantined_not_retried() {
        let queue = queue_with(&["ok", "bad"]).await;
        let remote = MemoryRemote::new();
        remote.reject_description("bad");
        let processor = SyncProcessor::new(queue.clone(), Arc::new(remote.client()));

        let report = processor.drain().await;
        assert_eq!(report.summary().unwrap().quarantined(), 1);
        assert!(queue.is_empty().await);
        assert_eq!(queue.rejected().await.len(), 1);

        processor.drain().await;
        assert_eq!(remote.write_attempts(), 2);
    }

    #[tokio::test]
    async fn slow_writes_time_out_and_stay_queued() {
        let queue = queue_with(&["A"]).await;
        let remote = MemoryRemote::new();
        remote.set_write_delay(Duration::from_millis(200));
        let processor = SyncProcessor::new(queue.clone(), Arc::new(remote.client()))
            .with_write_timeout(Duration::from_millis(20));

        let report = processor.drain().await;
        let item = &report.summary().unwrap().items[0];
        assert_eq!(
            item.outcome,
            SyncOutcome::Failed(RemoteError::Timeout(Duration::from_millis(20)))
        );
        assert_eq!(queue.len().await, 1);
        assert!(remote.accepted_writes().is_empty());
    }

    #[tokio::test]
    async fn committed_item_is_not_resent_when_local_removal_failed() {
        let queue = queue_with(&["A"]).await;
        let remote = MemoryRemote::new();
        let processor = SyncProcessor::new(queue.clone(), Arc::new(remote.client()));

        queue.store().set_fail_writes(true);
        processor.drain().await;
        assert_eq!(queue.len().await, 1);

        queue.store().set_fail_writes(false);
        let report = processor.drain().await;
        assert_eq!(report.summary().unwrap().committed(), 1);
        assert_eq!(remote.write_attempts(), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn reconnect_edge_triggers_a_drain() {
        let queue = queue_with(&["A"]).await;
        let remote = MemoryRemote::new();
        let processor = Arc::new(SyncProcessor::new(queue.clone(), Arc::new(remote.client())));
        let monitor = ConnectivityMonitor::new(Connectivity::Offline);

        let handle = spawn_auto_drain(&monitor, processor);
        tokio::task::yield_now().await;
        assert_eq!(remote.write_attempts(), 0);

        monitor.record(true);
        tokio::time::timeout(Duration::from_secs(2), async {
            while !queue.is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(remote.write_attempts(), 1);
        assert_eq!(monitor.consumer_count(), 1);

        handle.stop();
        tokio::time::timeout(Duration::from_secs(2), async {
            while monitor.consumer_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
