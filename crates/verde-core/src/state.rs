//! Shared cross-platform state types.

/// Unified sync state shown by client hosts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    Syncing,
    /// Online with submissions still queued
    Pending,
    Synced,
    /// Some submissions were rejected and need attention
    Error,
}

impl SyncState {
    /// Derive the state from connectivity and queue counts.
    pub const fn derive(online: bool, draining: bool, pending: usize, rejected: usize) -> Self {
        if draining {
            Self::Syncing
        } else if !online {
            Self::Offline
        } else if rejected > 0 {
            Self::Error
        } else if pending > 0 {
            Self::Pending
        } else {
            Self::Synced
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "needs attention",
        }
    }
}
