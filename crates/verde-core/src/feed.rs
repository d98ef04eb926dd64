//! Live feed reconciliation.
//!
//! Remote snapshots arrive whole and in any order. [`FeedState`] turns each
//! one into a stable, deduplicated view and reports which confirmed reports
//! are new since the previous snapshot. [`FeedSynchronizer`] drives a
//! [`FeedState`] from a [`FeedSource`] and hands updates to callbacks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{FeedRecord, Identity, PendingSubmission, RemoteReport, ReportId};
use crate::remote::{FeedError, FeedSource, SourceHandle};

/// Which reports a subscription covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedScope {
    All,
    /// Reports authored by one user
    Author(String),
}

impl FeedScope {
    /// Reports of the signed-in user, or every report when nobody is signed in.
    pub fn mine(identity: Option<&Identity>) -> Self {
        identity.map_or(Self::All, |identity| {
            Self::Author(identity.user_id.clone())
        })
    }

    pub fn author(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Author(user_id) => Some(user_id),
        }
    }

    pub fn matches(&self, report: &RemoteReport) -> bool {
        match self {
            Self::All => true,
            Self::Author(user_id) => report.is_authored_by(user_id),
        }
    }
}

/// Rendering options for a feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedOptions {
    /// Render this client's unacknowledged writes. They never count as arrivals.
    pub include_pending_local_writes: bool,
}

/// A rendered item: a committed report or a locally queued submission.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEntry {
    Confirmed(RemoteReport),
    Pending(PendingSubmission),
}

impl FeedEntry {
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Confirmed(report) => &report.payload.description,
            Self::Pending(submission) => &submission.payload.description,
        }
    }
}

/// Ordered view of one remote snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    reports: Vec<RemoteReport>,
    known_ids: BTreeSet<ReportId>,
}

impl FeedSnapshot {
    /// Reports newest first; equal timestamps ordered by id.
    pub fn reports(&self) -> &[RemoteReport] {
        &self.reports
    }

    /// Ids of confirmed reports in this snapshot.
    pub const fn known_ids(&self) -> &BTreeSet<ReportId> {
        &self.known_ids
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn contains(&self, id: &ReportId) -> bool {
        self.known_ids.contains(id)
    }

    pub fn entries(&self) -> Vec<FeedEntry> {
        self.reports.iter().cloned().map(FeedEntry::Confirmed).collect()
    }

    /// Entries with queued submissions shown first, most recently queued on top.
    pub fn entries_with_queued(&self, queued: &[PendingSubmission]) -> Vec<FeedEntry> {
        let mut pending = queued.to_vec();
        pending.sort_by(|a, b| {
            b.enqueued_at
                .cmp(&a.enqueued_at)
                .then_with(|| a.client_key.cmp(&b.client_key))
        });

        pending
            .into_iter()
            .map(FeedEntry::Pending)
            .chain(self.entries())
            .collect()
    }
}

/// Count of newly arrived reports in one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalNotice {
    pub count: usize,
}

impl ArrivalNotice {
    pub fn message(&self) -> String {
        if self.count == 1 {
            "1 new report".to_string()
        } else {
            format!("{} new reports", self.count)
        }
    }
}

impl fmt::Display for ArrivalNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Result of reconciling one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedUpdate {
    pub snapshot: FeedSnapshot,
    /// Newly confirmed ids, in display order
    pub arrivals: Vec<ReportId>,
    pub notice: Option<ArrivalNotice>,
}

/// Pure snapshot reconciliation.
#[derive(Debug, Default)]
pub struct FeedState {
    options: FeedOptions,
    current: Option<FeedSnapshot>,
    /// Previously confirmed ids that are pending again; not new when they return
    held: BTreeSet<ReportId>,
}

impl FeedState {
    pub fn new(options: FeedOptions) -> Self {
        Self {
            options,
            current: None,
            held: BTreeSet::new(),
        }
    }

    /// Last reconciled snapshot, if any arrived yet.
    pub const fn snapshot(&self) -> Option<&FeedSnapshot> {
        self.current.as_ref()
    }

    /// Reconcile a full remote snapshot against the previous one.
    ///
    /// The first snapshot only sets the baseline and reports no arrivals.
    pub fn apply(&mut self, records: Vec<FeedRecord>) -> FeedUpdate {
        let mut by_id = BTreeMap::new();
        for record in records {
            // Last occurrence of an id wins
            by_id.insert(record.report.id.clone(), record);
        }

        let mut reports = Vec::with_capacity(by_id.len());
        let mut known_ids = BTreeSet::new();
        let mut pending_ids = BTreeSet::new();
        for (id, record) in by_id {
            let pending = record.pending_local_write || !record.report.is_confirmed();
            if pending {
                pending_ids.insert(id);
                if self.options.include_pending_local_writes {
                    reports.push(record.report);
                }
                continue;
            }
            known_ids.insert(id);
            reports.push(record.report);
        }
        reports.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let arrivals = match &self.current {
            Some(previous) => reports
                .iter()
                .filter(|report| {
                    known_ids.contains(&report.id)
                        && !previous.known_ids.contains(&report.id)
                        && !self.held.contains(&report.id)
                })
                .map(|report| report.id.clone())
                .collect(),
            None => Vec::new(),
        };
        let held = pending_ids
            .into_iter()
            .filter(|id| {
                self.held.contains(id)
                    || self
                        .current
                        .as_ref()
                        .is_some_and(|previous| previous.known_ids.contains(id))
            })
            .collect();
        self.held = held;
        let notice = (!arrivals.is_empty()).then(|| ArrivalNotice {
            count: arrivals.len(),
        });

        let snapshot = FeedSnapshot { reports, known_ids };
        self.current = Some(snapshot.clone());
        FeedUpdate {
            snapshot,
            arrivals,
            notice,
        }
    }
}

/// Subscribes views to a live feed source.
pub struct FeedSynchronizer<F> {
    source: Arc<F>,
    options: FeedOptions,
}

impl<F: FeedSource> FeedSynchronizer<F> {
    pub fn new(source: Arc<F>) -> Self {
        Self {
            source,
            options: FeedOptions::default(),
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: FeedOptions) -> Self {
        self.options = options;
        self
    }

    /// Start a live subscription. Must be called inside a tokio runtime.
    ///
    /// `on_update` runs for every snapshot in source order; `on_error` runs
    /// for subscription errors, after which the last good snapshot is kept.
    pub fn subscribe<U, E>(&self, scope: FeedScope, mut on_update: U, mut on_error: E) -> FeedSubscription
    where
        U: FnMut(&FeedUpdate) + Send + 'static,
        E: FnMut(&FeedError) + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let gate = Arc::new(DeliveryGate::new());
        let latest = Arc::new(Mutex::new(None));

        let source = self.source.subscribe(&scope, sender);
        tracing::debug!(?scope, "Feed subscription started");

        let mut state = FeedState::new(self.options);
        let task_gate = gate.clone();
        let task_latest = latest.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if !task_gate.is_open() {
                    break;
                }

                let delivered = match event {
                    Ok(records) => {
                        let update = state.apply(records);
                        if let Some(notice) = update.notice {
                            tracing::info!("{notice}");
                        }
                        task_gate.deliver(|| {
                            *task_latest.lock().unwrap_or_else(PoisonError::into_inner) =
                                Some(update.snapshot.clone());
                            on_update(&update);
                        })
                    }
                    Err(error) => {
                        tracing::warn!("Feed subscription error: {error}");
                        task_gate.deliver(|| on_error(&error))
                    }
                };
                if !delivered {
                    break;
                }
            }
        });

        FeedSubscription {
            scope,
            gate,
            source: Some(source),
            task: Some(task),
            latest,
        }
    }
}

/// Liveness shared by a subscription and its delivery task.
///
/// Callbacks run while holding `running`, and closing takes the same lock, so
/// no callback is still executing once [`FeedSubscription::unsubscribe`]
/// returns. A callback that unsubscribes its own feed skips the wait.
struct DeliveryGate {
    alive: AtomicBool,
    running: Mutex<()>,
    delivering_on: Mutex<Option<ThreadId>>,
}

impl DeliveryGate {
    fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            running: Mutex::new(()),
            delivering_on: Mutex::new(None),
        }
    }

    fn is_open(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Run one callback unless closed. Returns false once closed.
    fn deliver(&self, callback: impl FnOnce()) -> bool {
        let _running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_open() {
            return false;
        }
        *self.delivering_thread() = Some(thread::current().id());
        callback();
        *self.delivering_thread() = None;
        true
    }

    /// Close and wait for a callback running on another thread.
    ///
    /// Returns false when already closed.
    fn close(&self) -> bool {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return false;
        }
        let reentrant = *self.delivering_thread() == Some(thread::current().id());
        if !reentrant {
            drop(self.running.lock().unwrap_or_else(PoisonError::into_inner));
        }
        true
    }

    fn delivering_thread(&self) -> std::sync::MutexGuard<'_, Option<ThreadId>> {
        self.delivering_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancellation token for a live feed; dropping it unsubscribes.
pub struct FeedSubscription {
    scope: FeedScope,
    gate: Arc<DeliveryGate>,
    source: Option<SourceHandle>,
    task: Option<JoinHandle<()>>,
    latest: Arc<Mutex<Option<FeedSnapshot>>>,
}

impl FeedSubscription {
    pub const fn scope(&self) -> &FeedScope {
        &self.scope
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }

    /// Last good snapshot delivered to this subscription.
    pub fn latest(&self) -> Option<FeedSnapshot> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop deliveries.
    ///
    /// No callback starts after this returns, and one already running on
    /// another thread has finished; called from inside a callback, that
    /// callback is allowed to complete on its own.
    pub fn unsubscribe(&mut self) {
        if !self.gate.close() {
            return;
        }
        drop(self.source.take());
        if let Some(task) = self.task.take() {
            task.abort();
        }
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!(scope = ?self.scope, "Feed subscription stopped");
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
