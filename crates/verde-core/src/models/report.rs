//! Incident report model

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Server-assigned identifier of a committed report.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(String);

impl ReportId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReportId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Geographic coordinates attached to a report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Report fields as entered by the citizen.
///
/// The sync pipeline treats this as opaque; only [`ReportPayload::normalized`]
/// looks inside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPayload {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
    #[serde(default)]
    pub video_urls: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

impl ReportPayload {
    /// Create a payload for the given category.
    #[must_use]
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = subcategory.into();
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    #[must_use]
    pub const fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(GeoPoint {
            latitude,
            longitude,
        });
        self
    }

    /// Trim fields, require a category and derive a missing description.
    ///
    /// A blank description becomes `"{category} - {subcategory}"`, or just the
    /// category when no subcategory was picked.
    pub fn normalized(mut self) -> Result<Self> {
        self.category = self.category.trim().to_string();
        self.subcategory = self.subcategory.trim().to_string();
        self.address = self.address.trim().to_string();
        self.description = self.description.trim().to_string();

        if self.category.is_empty() {
            return Err(Error::InvalidInput(
                "report category cannot be empty".to_string(),
            ));
        }

        if self.description.is_empty() {
            self.description = if self.subcategory.is_empty() {
                self.category.clone()
            } else {
                format!("{} - {}", self.category, self.subcategory)
            };
        }

        self.photo_urls = normalize_urls(self.photo_urls);
        self.video_urls = normalize_urls(self.video_urls);
        self.user_id = crate::util::normalize_text_option(self.user_id);
        self.user_email = crate::util::normalize_text_option(self.user_email);
        Ok(self)
    }
}

fn normalize_urls(urls: Vec<String>) -> Vec<String> {
    urls.into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect()
}

/// Durability state of a remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteState {
    /// Visible optimistically, not yet durably accepted by the server
    Pending,
    /// Durably committed on the server
    Confirmed,
}

/// A report once the remote store has accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteReport {
    pub id: ReportId,
    #[serde(flatten)]
    pub payload: ReportPayload,
    /// Server creation timestamp (Unix ms)
    pub created_at: i64,
    #[serde(default = "confirmed")]
    pub write_state: WriteState,
}

const fn confirmed() -> WriteState {
    WriteState::Confirmed
}

impl RemoteReport {
    pub const fn is_confirmed(&self) -> bool {
        matches!(self.write_state, WriteState::Confirmed)
    }

    /// Whether the report was authored by the given user.
    pub fn is_authored_by(&self, user_id: &str) -> bool {
        self.payload.user_id.as_deref() == Some(user_id)
    }
}

/// One record of a remote snapshot together with its write metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    pub report: RemoteReport,
    /// Set when the record only exists as an unacknowledged write from this client
    pub pending_local_write: bool,
}

impl FeedRecord {
    pub const fn confirmed(report: RemoteReport) -> Self {
        Self {
            report,
            pending_local_write: false,
        }
    }

    pub const fn pending(report: RemoteReport) -> Self {
        Self {
            report,
            pending_local_write: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_requires_category() {
        let error = ReportPayload::new("   ").normalized().unwrap_err();
        assert!(error.to_string().contains("category"));
    }

    #[test]
    fn normalized_derives_description_from_category() {
        let payload = ReportPayload::new(" Baches ").normalized().unwrap();
        assert_eq!(payload.description, "Baches");

        let payload = ReportPayload::new("Basura")
            .with_subcategory("Contenedor lleno")
            .normalized()
            .unwrap();
        assert_eq!(payload.description, "Basura - Contenedor lleno");
    }

    #[test]
    fn normalized_keeps_explicit_description_and_drops_blank_urls() {
        let mut payload = ReportPayload::new("Baches").with_description("  pothole ");
        payload.photo_urls = vec![" https://cdn/a.jpg ".to_string(), "  ".to_string()];
        payload.user_id = Some("   ".to_string());

        let payload = payload.normalized().unwrap();
        assert_eq!(payload.description, "pothole");
        assert_eq!(payload.photo_urls, vec!["https://cdn/a.jpg".to_string()]);
        assert_eq!(payload.user_id, None);
    }

    #[test]
    fn payload_serializes_document_field_names() {
        let mut payload = ReportPayload::new("Baches").with_location(-33.4, -70.6);
        payload.user_id = Some("u1".to_string());
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["category"], "Baches");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["location"]["latitude"], -33.4);
        assert!(json.get("photoUrls").is_some());
    }

    #[test]
    fn remote_report_defaults_to_confirmed() {
        let json = r#"{"id":"abc","category":"Baches","createdAt":42}"#;
        let report: RemoteReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.id.as_str(), "abc");
        assert_eq!(report.created_at, 42);
        assert!(report.is_confirmed());
    }
}
