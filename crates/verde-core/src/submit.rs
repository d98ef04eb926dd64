//! Submission entry point used by the UI.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::connectivity::ConnectivityMonitor;
use crate::db::KeyValueStore;
use crate::error::Result;
use crate::models::{ClientKey, IdentityProvider, PendingSubmission, ReportId, ReportPayload};
use crate::queue::OfflineQueue;
use crate::remote::{RemoteError, RemoteSink};
use crate::sync::DEFAULT_WRITE_TIMEOUT;

/// What happened to a submitted report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Committed by the remote store right away
    Sent(ReportId),
    /// Saved locally; sent on the next drain
    Queued(ClientKey),
}

impl SubmitOutcome {
    pub const fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    /// User-facing confirmation text.
    pub const fn message(&self) -> &'static str {
        match self {
            Self::Sent(_) => "Report sent",
            Self::Queued(_) => "Saved offline. It will be sent when the connection returns",
        }
    }
}

impl fmt::Display for SubmitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Sends reports directly when online and queues them otherwise.
pub struct ReportSubmitter<S: KeyValueStore, R: RemoteSink> {
    queue: Arc<OfflineQueue<S>>,
    sink: Arc<R>,
    monitor: ConnectivityMonitor,
    identity: Option<Arc<dyn IdentityProvider>>,
    write_timeout: Duration,
}

impl<S: KeyValueStore, R: RemoteSink> ReportSubmitter<S, R> {
    pub fn new(queue: Arc<OfflineQueue<S>>, sink: Arc<R>, monitor: ConnectivityMonitor) -> Self {
        Self {
            queue,
            sink,
            monitor,
            identity: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    #[must_use]
    pub const fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Submit a report.
    ///
    /// Fails only for invalid input or when the local queue cannot persist the
    /// report. Connectivity problems always end in [`SubmitOutcome::Queued`].
    pub async fn submit(&self, payload: ReportPayload) -> Result<SubmitOutcome> {
        let payload = self.stamp_identity(payload.normalized()?);
        // The queued copy keeps the key of the direct attempt so a write that
        // landed despite a timeout is deduplicated by the remote store.
        let submission = PendingSubmission::new(payload);
        let client_key = submission.client_key;

        if self.monitor.is_online() {
            match self.write_direct(client_key, &submission.payload).await {
                Ok(id) => {
                    tracing::info!("Report sent as {id}");
                    return Ok(SubmitOutcome::Sent(id));
                }
                Err(error) => {
                    tracing::warn!("Direct write failed, queueing report: {error}");
                }
            }
        } else {
            tracing::debug!("Offline; queueing report without a network call");
        }

        self.queue.append(submission).await?;
        Ok(SubmitOutcome::Queued(client_key))
    }

    async fn write_direct(
        &self,
        key: ClientKey,
        payload: &ReportPayload,
    ) -> std::result::Result<ReportId, RemoteError> {
        tokio::time::timeout(self.write_timeout, self.sink.write(key, payload))
            .await
            .unwrap_or(Err(RemoteError::Timeout(self.write_timeout)))
    }

    fn stamp_identity(&self, mut payload: ReportPayload) -> ReportPayload {
        let Some(identity) = self
            .identity
            .as_ref()
            .and_then(|provider| provider.current_identity())
        else {
            return payload;
        };

        if payload.user_id.is_none() {
            payload.user_id = Some(identity.user_id);
        }
        if payload.user_email.is_none() {
            payload.user_email = identity.email;
        }
        payload
    }
}
