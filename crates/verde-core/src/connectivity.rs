//! Edge-triggered network reachability monitor.
//!
//! The host reports raw reachability signals; consumers only hear about the
//! `offline -> online` transition. The host listener is attached while at
//! least one [`ConnectivitySubscription`] is alive.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const EVENT_CAPACITY: usize = 8;

/// Reachability state as last reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Offline,
    Online,
}

impl Connectivity {
    pub const fn from_connected(is_connected: bool) -> Self {
        if is_connected {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

/// Actionable connectivity transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// The network became reachable after being offline
    BecameReachable,
}

/// Callback invoked by the host with `is_connected`.
pub type ConnectivityListener = Box<dyn Fn(bool) + Send + Sync>;

/// Host registration; dropping it removes the listener.
pub struct ListenerHandle {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    pub fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// A handle with nothing to remove.
    pub const fn noop() -> Self {
        Self { remove: None }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

/// Host network stack reachability signal.
pub trait ConnectivityObserver: Send + Sync + 'static {
    fn add_listener(&self, listener: ConnectivityListener) -> ListenerHandle;
}

struct MonitorState {
    status: Connectivity,
    consumers: usize,
    registration: Option<ListenerHandle>,
}

struct Inner {
    state: Mutex<MonitorState>,
    events: broadcast::Sender<ConnectivityEvent>,
    observer: Option<Arc<dyn ConnectivityObserver>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, is_connected: bool) -> bool {
        let next = Connectivity::from_connected(is_connected);
        let previous = {
            let mut state = self.lock();
            std::mem::replace(&mut state.status, next)
        };

        match (previous, next) {
            (Connectivity::Offline, Connectivity::Online) => {
                tracing::info!("Network became reachable");
                let _ = self.events.send(ConnectivityEvent::BecameReachable);
                true
            }
            (Connectivity::Online, Connectivity::Offline) => {
                tracing::info!("Network became unreachable");
                false
            }
            _ => false,
        }
    }

    fn attach_observer(self: &Arc<Self>) {
        let Some(observer) = self.observer.clone() else {
            return;
        };

        let weak = Arc::downgrade(self);
        // The host may invoke the listener synchronously, so no lock is held here
        let handle = observer.add_listener(Box::new(move |is_connected| {
            if let Some(inner) = weak.upgrade() {
                inner.apply(is_connected);
            }
        }));

        let mut state = self.lock();
        if state.consumers > 0 && state.registration.is_none() {
            state.registration = Some(handle);
            tracing::debug!("Attached connectivity listener");
        } else {
            drop(state);
            drop(handle);
        }
    }

    fn release_consumer(&self) {
        let registration = {
            let mut state = self.lock();
            state.consumers = state.consumers.saturating_sub(1);
            if state.consumers == 0 {
                state.registration.take()
            } else {
                None
            }
        };

        if registration.is_some() {
            tracing::debug!("Detached connectivity listener");
        }
        drop(registration);
    }
}

/// Shared connectivity state machine; clones observe the same state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Monitor fed manually through [`ConnectivityMonitor::record`].
    pub fn new(initial: Connectivity) -> Self {
        Self::build(initial, None)
    }

    /// Monitor that listens to a host observer while it has consumers.
    pub fn with_observer(initial: Connectivity, observer: Arc<dyn ConnectivityObserver>) -> Self {
        Self::build(initial, Some(observer))
    }

    fn build(initial: Connectivity, observer: Option<Arc<dyn ConnectivityObserver>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MonitorState {
                    status: initial,
                    consumers: 0,
                    registration: None,
                }),
                events,
                observer,
            }),
        }
    }

    /// Apply a reachability signal; returns `true` when it was an
    /// `offline -> online` edge.
    pub fn record(&self, is_connected: bool) -> bool {
        self.inner.apply(is_connected)
    }

    pub fn status(&self) -> Connectivity {
        self.inner.lock().status
    }

    pub fn is_online(&self) -> bool {
        self.status() == Connectivity::Online
    }

    /// Number of live subscriptions.
    pub fn consumer_count(&self) -> usize {
        self.inner.lock().consumers
    }

    /// Whether the host listener is currently attached.
    pub fn is_listening(&self) -> bool {
        self.inner.lock().registration.is_some()
    }

    /// Register a consumer of `offline -> online` edges.
    pub fn subscribe(&self) -> ConnectivitySubscription {
        let receiver = self.inner.events.subscribe();
        let needs_listener = {
            let mut state = self.inner.lock();
            state.consumers += 1;
            state.consumers == 1 && state.registration.is_none()
        };

        if needs_listener {
            self.inner.attach_observer();
        }

        ConnectivitySubscription {
            receiver,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// A live consumer registration; dropping it may detach the host listener.
pub struct ConnectivitySubscription {
    receiver: broadcast::Receiver<ConnectivityEvent>,
    inner: Weak<Inner>,
}

impl ConnectivitySubscription {
    /// Wait for the next edge; `None` once every monitor handle is gone.
    pub async fn recv(&mut self) -> Option<ConnectivityEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            // Missed edges collapse into one: a drain covers them all
            Err(RecvError::Lagged(_)) => Some(ConnectivityEvent::BecameReachable),
            Err(RecvError::Closed) => None,
        }
    }
}

impl Drop for ConnectivitySubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.release_consumer();
        }
    }
}
