//! Data models for Verde

mod category;
mod identity;
mod report;
mod submission;

pub use category::{Category, Subcategory};
pub use identity::{Identity, IdentityProvider, StaticIdentity};
pub use report::{FeedRecord, GeoPoint, RemoteReport, ReportId, ReportPayload, WriteState};
pub use submission::{ClientKey, PendingSubmission, RejectedSubmission};
