//! verde-core - Core library for Verde
//!
//! Offline-resilient incident reporting: a durable submission queue, an
//! edge-triggered connectivity monitor, a single-flight sync processor and a
//! live feed synchronizer, shared by every Verde client host.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod queue;
pub mod remote;
pub mod services;
pub mod state;
pub mod submit;
pub mod sync;
pub mod util;

pub use config::ClientConfig;
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use error::{Error, Result};
pub use feed::{FeedScope, FeedSnapshot, FeedUpdate};
pub use models::{ClientKey, PendingSubmission, RemoteReport, ReportId, ReportPayload};
pub use services::{ReportingService, ServiceOptions};
pub use state::SyncState;
pub use submit::SubmitOutcome;
