//! Reporting service shared across client hosts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::connectivity::ConnectivityMonitor;
use crate::db::{KeyValueStore, LibSqlKeyValueStore};
use crate::feed::{FeedOptions, FeedScope, FeedSubscription, FeedSynchronizer, FeedUpdate};
use crate::models::{ClientKey, IdentityProvider, PendingSubmission, RejectedSubmission, ReportPayload};
use crate::queue::{OfflineQueue, QueueEvent};
use crate::remote::{FeedError, FeedSource, RemoteSink};
use crate::state::SyncState;
use crate::submit::{ReportSubmitter, SubmitOutcome};
use crate::sync::{spawn_auto_drain, AutoDrainHandle, DrainReport, SyncProcessor, DEFAULT_WRITE_TIMEOUT};
use crate::Result;

/// Wiring options for [`ReportingService`].
#[derive(Clone, Default)]
pub struct ServiceOptions {
    pub write_timeout: Option<Duration>,
    pub identity: Option<Arc<dyn IdentityProvider>>,
    pub feed: FeedOptions,
}

/// Queue, submitter, processor and feed wired to one remote.
pub struct ReportingService<S: KeyValueStore, R: RemoteSink + FeedSource> {
    queue: Arc<OfflineQueue<S>>,
    monitor: ConnectivityMonitor,
    submitter: ReportSubmitter<S, R>,
    processor: Arc<SyncProcessor<S, R>>,
    feed: FeedSynchronizer<R>,
    identity: Option<Arc<dyn IdentityProvider>>,
    db_path: Option<PathBuf>,
}

impl<R: RemoteSink + FeedSource> ReportingService<LibSqlKeyValueStore, R> {
    /// Open the durable queue at `db_path` and wire it to `remote`.
    ///
    /// A queue file that is not a database is moved aside and recreated.
    pub async fn open_path(
        db_path: impl Into<PathBuf>,
        remote: Arc<R>,
        monitor: ConnectivityMonitor,
        options: ServiceOptions,
    ) -> Result<Self> {
        let db_path = db_path.into();
        let store = match LibSqlKeyValueStore::open(&db_path).await {
            Ok(store) => store,
            Err(error) if is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Queue database at {} is unreadable: {}. Moving it aside and starting empty.",
                    db_path.display(),
                    error
                );
                quarantine_corrupted_db_files(&db_path)?;
                LibSqlKeyValueStore::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        let mut service = Self::new(store, remote, monitor, options);
        service.db_path = Some(db_path);
        Ok(service)
    }

    /// In-memory libSQL queue (primarily for tests).
    pub async fn open_in_memory(
        remote: Arc<R>,
        monitor: ConnectivityMonitor,
        options: ServiceOptions,
    ) -> Result<Self> {
        let store = LibSqlKeyValueStore::open_in_memory().await?;
        Ok(Self::new(store, remote, monitor, options))
    }
}

impl<S: KeyValueStore, R: RemoteSink + FeedSource> ReportingService<S, R> {
    pub fn new(store: S, remote: Arc<R>, monitor: ConnectivityMonitor, options: ServiceOptions) -> Self {
        let write_timeout = options.write_timeout.unwrap_or(DEFAULT_WRITE_TIMEOUT);
        let queue = Arc::new(OfflineQueue::new(store));

        let mut submitter = ReportSubmitter::new(queue.clone(), remote.clone(), monitor.clone())
            .with_write_timeout(write_timeout);
        if let Some(identity) = options.identity.clone() {
            submitter = submitter.with_identity(identity);
        }
        let processor = Arc::new(
            SyncProcessor::new(queue.clone(), remote.clone()).with_write_timeout(write_timeout),
        );
        let feed = FeedSynchronizer::new(remote).with_options(options.feed);

        Self {
            queue,
            monitor,
            submitter,
            processor,
            feed,
            identity: options.identity,
            db_path: None,
        }
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub const fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub const fn queue(&self) -> &Arc<OfflineQueue<S>> {
        &self.queue
    }

    pub async fn submit(&self, payload: ReportPayload) -> Result<SubmitOutcome> {
        self.submitter.submit(payload).await
    }

    pub async fn drain(&self) -> DrainReport {
        self.processor.drain().await
    }

    /// Drain now if online and again on every reconnect.
    pub fn start_auto_drain(&self) -> AutoDrainHandle {
        spawn_auto_drain(&self.monitor, self.processor.clone())
    }

    /// Live feed for `scope`.
    pub fn watch<U, E>(&self, scope: FeedScope, on_update: U, on_error: E) -> FeedSubscription
    where
        U: FnMut(&FeedUpdate) + Send + 'static,
        E: FnMut(&FeedError) + Send + 'static,
    {
        self.feed.subscribe(scope, on_update, on_error)
    }

    /// Scope of the signed-in user's own reports, or all reports when signed out.
    pub fn my_scope(&self) -> FeedScope {
        let identity = self
            .identity
            .as_ref()
            .and_then(|provider| provider.current_identity());
        FeedScope::mine(identity.as_ref())
    }

    pub async fn pending(&self) -> Vec<PendingSubmission> {
        self.queue.list().await
    }

    pub async fn rejected(&self) -> Vec<RejectedSubmission> {
        self.queue.rejected().await
    }

    pub async fn requeue(&self, key: &ClientKey) -> Result<PendingSubmission> {
        self.queue.requeue(key).await
    }

    pub fn queue_events(&self) -> tokio::sync::broadcast::Receiver<QueueEvent> {
        self.queue.events()
    }

    pub async fn sync_state(&self) -> SyncState {
        let pending = self.queue.len().await;
        let rejected = self.queue.rejected().await.len();
        SyncState::derive(
            self.monitor.is_online(),
            self.processor.is_draining(),
            pending,
            rejected,
        )
    }
}

fn is_corrupted_db_error(error: &crate::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("file is not a database") || message.contains("database disk image is malformed")
}

fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
    if db_path.exists() {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let base_name = db_path
            .file_name()
            .map_or_else(|| "queue.db".into(), |name| name.to_string_lossy());
        let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

        std::fs::rename(db_path, &backup_path)?;
        tracing::warn!(
            "Moved corrupted queue database from {} to {}",
            db_path.display(),
            backup_path.display()
        );
    }

    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
        return Ok(());
    };
    let sidecar_prefix = format!("{base_name}-");

    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        // WAL and shared-memory sidecars of the moved file
        if file_name.starts_with(&sidecar_prefix) && !file_name.contains(".corrupt-") {
            let path = entry.path();
            std::fs::remove_file(&path)?;
            tracing::warn!("Removed stale queue database file {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::Connectivity;
    use crate::models::StaticIdentity;
    use crate::remote::{MemoryRemote, MemoryRemoteClient};

    async fn service(
        remote: &MemoryRemote,
        initial: Connectivity,
    ) -> ReportingService<LibSqlKeyValueStore, MemoryRemoteClient> {
        ReportingService::open_in_memory(
            Arc::new(remote.client()),
            ConnectivityMonitor::new(initial),
            ServiceOptions::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_reports_reach_the_remote_after_reconnect() {
        let remote = MemoryRemote::new();
        let service = service(&remote, Connectivity::Offline).await;

        let outcome = service.submit(ReportPayload::new("Baches")).await.unwrap();
        assert!(outcome.is_queued());
        assert_eq!(service.sync_state().await, SyncState::Offline);

        service.monitor().record(true);
        assert_eq!(service.sync_state().await, SyncState::Pending);

        let report = service.drain().await;
        assert_eq!(report.summary().unwrap().committed(), 1);
        assert_eq!(service.sync_state().await, SyncState::Synced);
        assert_eq!(remote.accepted_writes().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_reports_can_be_requeued() {
        let remote = MemoryRemote::new();
        remote.reject_description("spam");
        let service = service(&remote, Connectivity::Online).await;

        service
            .submit(ReportPayload::new("Otros").with_description("spam"))
            .await
            .unwrap();
        // Direct write was rejected, so it was queued; the drain quarantines it
        service.drain().await;
        let rejected = service.rejected().await;
        assert_eq!(rejected.len(), 1);
        assert_eq!(service.sync_state().await, SyncState::Error);

        let key = rejected[0].submission.client_key;
        service.requeue(&key).await.unwrap();
        assert_eq!(service.pending().await.len(), 1);
        assert!(service.rejected().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn my_scope_follows_identity() {
        let remote = MemoryRemote::new();
        let anonymous = service(&remote, Connectivity::Online).await;
        assert_eq!(anonymous.my_scope(), FeedScope::All);

        let signed_in = ReportingService::open_in_memory(
            Arc::new(remote.client()),
            ConnectivityMonitor::new(Connectivity::Online),
            ServiceOptions {
                identity: Some(Arc::new(StaticIdentity::new(Some("u1".to_string()), None))),
                ..ServiceOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(signed_in.my_scope(), FeedScope::Author("u1".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queue_survives_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let remote = MemoryRemote::new();

        {
            let service = ReportingService::open_path(
                &path,
                Arc::new(remote.client()),
                ConnectivityMonitor::new(Connectivity::Offline),
                ServiceOptions::default(),
            )
            .await
            .unwrap();
            service.submit(ReportPayload::new("Baches")).await.unwrap();
        }

        let reopened = ReportingService::open_path(
            &path,
            Arc::new(remote.client()),
            ConnectivityMonitor::new(Connectivity::Offline),
            ServiceOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(reopened.pending().await.len(), 1);
        assert_eq!(reopened.db_path(), Some(path.as_path()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn garbage_queue_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        std::fs::write(&path, vec![0xAB_u8; 4096]).unwrap();

        let service = ReportingService::open_path(
            &path,
            Arc::new(MemoryRemote::new().client()),
            ConnectivityMonitor::new(Connectivity::Offline),
            ServiceOptions::default(),
        )
        .await
        .unwrap();
        assert!(service.pending().await.is_empty());

        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(backups, 1);
    }
}
