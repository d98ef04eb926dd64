//! Remote document store seams and adapters.

mod http;
mod memory;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::feed::FeedScope;
use crate::models::{ClientKey, FeedRecord, ReportId, ReportPayload};

pub use http::{HttpReachabilityProbe, HttpReportsClient};
pub use memory::{MemoryRemote, MemoryRemoteClient};

/// Failure of a single remote write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Network or server unavailable; worth retrying later
    #[error("Remote store unreachable: {0}")]
    Unreachable(String),
    /// No answer within the write deadline
    #[error("Remote write timed out after {0:?}")]
    Timeout(Duration),
    /// The store refused the payload; retrying will not help
    #[error("Remote store rejected the report: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether the same payload may succeed on a later attempt.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Failure of a live feed subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("Feed unavailable: {0}")]
    Unavailable(String),
    #[error("Feed access denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid feed payload: {0}")]
    Decode(String),
}

/// One delivery from a live subscription: a full snapshot or an error.
pub type SnapshotEvent = Result<Vec<FeedRecord>, FeedError>;

/// Write side of the remote store.
pub trait RemoteSink: Send + Sync + 'static {
    /// Commit a report and return its server-assigned id.
    ///
    /// `key` is stable across retries of the same submission; a store that
    /// already committed it returns the existing id instead of a duplicate.
    fn write(
        &self,
        key: ClientKey,
        payload: &ReportPayload,
    ) -> impl Future<Output = Result<ReportId, RemoteError>> + Send;
}

/// Live query side of the remote store.
pub trait FeedSource: Send + Sync + 'static {
    /// Start delivering snapshots for `scope` into `events` until the
    /// returned handle is dropped.
    fn subscribe(
        &self,
        scope: &FeedScope,
        events: mpsc::UnboundedSender<SnapshotEvent>,
    ) -> SourceHandle;
}

/// Live source registration; dropping it stops deliveries.
pub struct SourceHandle {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl SourceHandle {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}
