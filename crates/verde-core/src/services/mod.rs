//! Service layer bundling the core components for client hosts.

mod reporting;

pub use reporting::{ReportingService, ServiceOptions};
