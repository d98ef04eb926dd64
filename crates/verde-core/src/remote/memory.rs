//! In-process remote store with optimistic writes.
//!
//! Each [`MemoryRemoteClient`] plays one device. A device sees its own
//! unconfirmed writes flagged as pending local writes; other devices only see
//! them after confirmation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use super::{FeedSource, RemoteError, RemoteSink, SnapshotEvent, SourceHandle};
use crate::feed::FeedScope;
use crate::models::{ClientKey, FeedRecord, RemoteReport, ReportId, ReportPayload, WriteState};
use crate::remote::FeedError;

struct StoredReport {
    report: RemoteReport,
    /// Device whose write is not yet confirmed
    pending_writer: Option<u64>,
}

struct Subscriber {
    id: u64,
    device: u64,
    scope: FeedScope,
    events: mpsc::UnboundedSender<SnapshotEvent>,
}

struct MemoryState {
    reports: Vec<StoredReport>,
    subscribers: Vec<Subscriber>,
    next_report: u64,
    next_subscriber: u64,
    next_device: u64,
    clock: i64,
    auto_confirm: bool,
    unreachable: bool,
    write_delay: Duration,
    scripted_failures: VecDeque<RemoteError>,
    rejected_descriptions: Vec<String>,
    accepted: Vec<ReportPayload>,
    committed_keys: HashMap<ClientKey, ReportId>,
    attempts: usize,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            reports: Vec::new(),
            subscribers: Vec::new(),
            next_report: 1,
            next_subscriber: 1,
            next_device: 1,
            clock: 1_700_000_000_000,
            auto_confirm: true,
            unreachable: false,
            write_delay: Duration::ZERO,
            scripted_failures: VecDeque::new(),
            rejected_descriptions: Vec::new(),
            accepted: Vec::new(),
            committed_keys: HashMap::new(),
            attempts: 0,
        }
    }
}

impl MemoryState {
    fn view_for(&self, device: u64, scope: &FeedScope) -> Vec<FeedRecord> {
        let mut records = self
            .reports
            .iter()
            .filter(|stored| scope.matches(&stored.report))
            .filter_map(|stored| match stored.pending_writer {
                None => Some(FeedRecord::confirmed(stored.report.clone())),
                Some(writer) if writer == device => {
                    Some(FeedRecord::pending(stored.report.clone()))
                }
                Some(_) => None,
            })
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.report.created_at.cmp(&a.report.created_at));
        records
    }

    fn publish(&mut self) {
        let views = self
            .subscribers
            .iter()
            .map(|subscriber| self.view_for(subscriber.device, &subscriber.scope))
            .collect::<Vec<_>>();

        let mut closed = Vec::new();
        for (subscriber, view) in self.subscribers.iter().zip(views) {
            if subscriber.events.send(Ok(view)).is_err() {
                closed.push(subscriber.id);
            }
        }
        self.subscribers.retain(|subscriber| !closed.contains(&subscriber.id));
    }

    fn commit(
        &mut self,
        device: u64,
        key: ClientKey,
        payload: &ReportPayload,
    ) -> Result<ReportId, RemoteError> {
        self.attempts += 1;

        if self.unreachable {
            return Err(RemoteError::Unreachable("memory remote is offline".to_string()));
        }
        if let Some(id) = self.committed_keys.get(&key) {
            return Ok(id.clone());
        }
        if let Some(error) = self.scripted_failures.pop_front() {
            return Err(error);
        }
        if self
            .rejected_descriptions
            .iter()
            .any(|description| *description == payload.description)
        {
            return Err(RemoteError::Rejected(format!(
                "payload '{}' failed validation",
                payload.description
            )));
        }

        let id = ReportId::new(format!("r{}", self.next_report));
        self.next_report += 1;
        self.clock += 1_000;

        let write_state = if self.auto_confirm {
            WriteState::Confirmed
        } else {
            WriteState::Pending
        };
        self.reports.push(StoredReport {
            report: RemoteReport {
                id: id.clone(),
                payload: payload.clone(),
                created_at: self.clock,
                write_state,
            },
            pending_writer: (!self.auto_confirm).then_some(device),
        });
        self.accepted.push(payload.clone());
        self.committed_keys.insert(key, id.clone());
        self.publish();
        Ok(id)
    }
}

/// Shared in-memory document store.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A new device connected to this store.
    pub fn client(&self) -> MemoryRemoteClient {
        let device = {
            let mut state = self.lock();
            let device = state.next_device;
            state.next_device += 1;
            device
        };
        MemoryRemoteClient {
            remote: self.clone(),
            device,
        }
    }

    /// Keep new writes pending until [`MemoryRemote::confirm_pending`].
    pub fn set_auto_confirm(&self, auto_confirm: bool) {
        self.lock().auto_confirm = auto_confirm;
    }

    /// Make every write fail as unreachable (or recover).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Delay every write by `delay` before it reaches the store.
    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = delay;
    }

    /// Fail the next write attempt with `error`.
    pub fn fail_next_write(&self, error: RemoteError) {
        self.lock().scripted_failures.push_back(error);
    }

    /// Permanently reject payloads with this description.
    pub fn reject_description(&self, description: impl Into<String>) {
        self.lock().rejected_descriptions.push(description.into());
    }

    /// Confirm every pending write and publish to all devices.
    pub fn confirm_pending(&self) -> usize {
        let mut state = self.lock();
        let mut confirmed = 0;
        for stored in &mut state.reports {
            if stored.pending_writer.take().is_some() {
                stored.report.write_state = WriteState::Confirmed;
                confirmed += 1;
            }
        }
        if confirmed > 0 {
            state.publish();
        }
        confirmed
    }

    /// Insert a confirmed report directly, as if another system wrote it.
    pub fn insert_confirmed(&self, report: RemoteReport) {
        let mut state = self.lock();
        state.reports.push(StoredReport {
            report,
            pending_writer: None,
        });
        state.publish();
    }

    /// Deliver a subscription error to every live subscriber.
    pub fn fail_subscribers(&self, error: &FeedError) {
        let state = self.lock();
        for subscriber in &state.subscribers {
            let _ = subscriber.events.send(Err(error.clone()));
        }
    }

    /// Re-send the current view to every subscriber.
    pub fn republish(&self) {
        self.lock().publish();
    }

    /// Payloads accepted so far, in commit order.
    pub fn accepted_writes(&self) -> Vec<ReportPayload> {
        self.lock().accepted.clone()
    }

    /// Number of write attempts, including failed ones.
    pub fn write_attempts(&self) -> usize {
        self.lock().attempts
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// One device's connection to a [`MemoryRemote`].
#[derive(Clone)]
pub struct MemoryRemoteClient {
    remote: MemoryRemote,
    device: u64,
}

impl MemoryRemoteClient {
    pub const fn remote(&self) -> &MemoryRemote {
        &self.remote
    }
}

impl RemoteSink for MemoryRemoteClient {
    async fn write(&self, key: ClientKey, payload: &ReportPayload) -> Result<ReportId, RemoteError> {
        let delay = self.remote.lock().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.remote.lock().commit(self.device, key, payload)
    }
}

impl FeedSource for MemoryRemoteClient {
    fn subscribe(
        &self,
        scope: &FeedScope,
        events: mpsc::UnboundedSender<SnapshotEvent>,
    ) -> SourceHandle {
        let id = {
            let mut state = self.remote.lock();
            let id = state.next_subscriber;
            state.next_subscriber += 1;

            let initial = state.view_for(self.device, scope);
            let _ = events.send(Ok(initial));
            state.subscribers.push(Subscriber {
                id,
                device: self.device,
                scope: scope.clone(),
                events,
            });
            id
        };

        let remote = self.remote.clone();
        SourceHandle::new(move || {
            remote
                .lock()
                .subscribers
                .retain(|subscriber| subscriber.id != id);
        })
    }
}
