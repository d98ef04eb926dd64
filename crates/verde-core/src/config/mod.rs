//! Client configuration.
//!
//! `ClientConfig` is read from a JSON file and then overridden by `VERDE_*`
//! environment variables. Unknown fields are rejected so typos surface early.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::StaticIdentity;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
const DEFAULT_CATEGORIES_TTL_SECS: u64 = 60 * 60;

/// Runtime settings shared by every client host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the incidents API; `None` runs fully offline
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_categories_ttl_secs")]
    pub categories_ttl_secs: u64,
    #[serde(default)]
    pub queue_db_path: Option<PathBuf>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_write_timeout_secs() -> u64 {
    DEFAULT_WRITE_TIMEOUT_SECS
}

const fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

const fn default_probe_interval_secs() -> u64 {
    DEFAULT_PROBE_INTERVAL_SECS
}

const fn default_categories_ttl_secs() -> u64 {
    DEFAULT_CATEGORIES_TTL_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            categories_ttl_secs: DEFAULT_CATEGORIES_TTL_SECS,
            queue_db_path: None,
            user_id: None,
            user_email: None,
        }
    }
}

impl ClientConfig {
    /// Parse, normalize and validate a JSON config document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config = serde_json::from_str::<Self>(raw)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load the config file at `path`; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}; using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            Error::Config(format!("Failed to read config at {}: {error}", path.display()))
        })?;
        Self::from_json(&raw)
            .map_err(|error| Error::Config(format!("{} ({})", error, path.display())))
    }

    /// Apply `VERDE_*` overrides read through `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = normalize_text_option(lookup("VERDE_API_BASE_URL")) {
            self.api_base_url = Some(value);
        }
        override_secs(&lookup, "VERDE_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs)?;
        override_secs(&lookup, "VERDE_WRITE_TIMEOUT_SECS", &mut self.write_timeout_secs)?;
        override_secs(&lookup, "VERDE_POLL_INTERVAL_SECS", &mut self.poll_interval_secs)?;
        override_secs(&lookup, "VERDE_PROBE_INTERVAL_SECS", &mut self.probe_interval_secs)?;
        override_secs(&lookup, "VERDE_CATEGORIES_TTL_SECS", &mut self.categories_ttl_secs)?;
        if let Some(value) = normalize_text_option(lookup("VERDE_DB_PATH")) {
            self.queue_db_path = Some(PathBuf::from(value));
        }
        if let Some(value) = normalize_text_option(lookup("VERDE_USER_ID")) {
            self.user_id = Some(value);
        }
        if let Some(value) = normalize_text_option(lookup("VERDE_USER_EMAIL")) {
            self.user_email = Some(value);
        }

        self.normalize();
        self.validate()?;
        Ok(self)
    }

    pub fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.user_id = normalize_text_option(self.user_id.take());
        self.user_email = normalize_text_option(self.user_email.take());
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(url) = self.api_base_url.as_deref() {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }

        for (field, value) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("write_timeout_secs", self.write_timeout_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("probe_interval_secs", self.probe_interval_secs),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{field} must be greater than zero")));
            }
        }
        Ok(())
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub const fn categories_ttl(&self) -> Duration {
        Duration::from_secs(self.categories_ttl_secs)
    }

    /// Identity configured for this client, if any.
    pub fn identity(&self) -> StaticIdentity {
        StaticIdentity::new(self.user_id.clone(), self.user_email.clone())
    }
}

fn override_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut u64,
) -> Result<()> {
    let Some(raw) = normalize_text_option(lookup(key)) else {
        return Ok(());
    };
    *target = raw
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a whole number of seconds, got '{raw}'")))?;
    Ok(())
}
