//! Locally queued submission model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ReportPayload;

/// Locally generated idempotency key, using UUID v7 (time-sortable)
///
/// Assigned once when the submission is created and carried unchanged
/// through every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientKey(Uuid);

impl ClientKey {
    /// Create a new unique client key using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this key
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ClientKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A report persisted locally before the remote store confirmed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub client_key: ClientKey,
    pub payload: ReportPayload,
    /// Local enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
}

impl PendingSubmission {
    /// Wrap a payload with a fresh client key
    #[must_use]
    pub fn new(payload: ReportPayload) -> Self {
        Self {
            client_key: ClientKey::new(),
            payload,
            enqueued_at: crate::util::unix_millis_now(),
        }
    }
}

/// A submission the remote store refused permanently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedSubmission {
    pub submission: PendingSubmission,
    pub reason: String,
    /// Rejection timestamp (Unix ms)
    pub rejected_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_keys_are_unique_and_sortable() {
        let first = ClientKey::new();
        let second = ClientKey::new();
        assert_ne!(first, second);
        assert!(first < second);
    }

    #[test]
    fn client_key_parse() {
        let key = ClientKey::new();
        let parsed: ClientKey = key.as_str().parse().unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn pending_submission_survives_json() {
        let submission = PendingSubmission::new(ReportPayload::new("Baches"));
        let raw = serde_json::to_string(&submission).unwrap();
        let back: PendingSubmission = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.client_key, submission.client_key);
        assert!(back.enqueued_at > 0);
    }
}
