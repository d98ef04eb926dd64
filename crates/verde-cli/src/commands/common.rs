use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use verde_core::connectivity::Connectivity;
use verde_core::db::LibSqlKeyValueStore;
use verde_core::feed::{FeedEntry, FeedOptions, FeedScope};
use verde_core::models::{ClientKey, PendingSubmission, RejectedSubmission, RemoteReport, ReportId};
use verde_core::remote::{
    FeedError, FeedSource, HttpReachabilityProbe, HttpReportsClient, RemoteError, RemoteSink,
    SnapshotEvent, SourceHandle,
};
use verde_core::{ClientConfig, ConnectivityMonitor, ReportPayload, ReportingService, ServiceOptions};

use crate::error::CliError;

const SHORT_KEY_LEN: usize = 13;
const PREVIEW_LEN: usize = 48;

/// Settings resolved from flags, config file and environment.
pub struct CliContext {
    pub config: ClientConfig,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub offline: bool,
}

impl CliContext {
    pub fn resolve(
        cli_config_path: Option<PathBuf>,
        cli_db_path: Option<PathBuf>,
        offline: bool,
    ) -> Result<Self, CliError> {
        let config_path = match cli_config_path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let config = load_config(&config_path)?;
        let db_path = resolve_db_path(cli_db_path, &config)?;

        Ok(Self {
            config,
            config_path,
            db_path,
            offline,
        })
    }

    /// HTTP client for the configured API, if there is one.
    pub fn http_client(&self) -> Result<Option<HttpReportsClient>, CliError> {
        let Some(base_url) = self.config.api_base_url.as_deref() else {
            return Ok(None);
        };
        let client = HttpReportsClient::new(base_url, self.config.request_timeout())?
            .with_poll_interval(self.config.poll_interval())
            .with_categories_ttl(self.config.categories_ttl());
        Ok(Some(client))
    }

    pub fn require_http_client(&self) -> Result<HttpReportsClient, CliError> {
        self.http_client()?.ok_or(CliError::ApiNotConfigured)
    }
}

pub type CliService = ReportingService<LibSqlKeyValueStore, CliRemote>;

/// Remote used by the CLI: the HTTP API, or nothing when none is configured.
#[derive(Clone)]
pub enum CliRemote {
    Http(HttpReportsClient),
    Unconfigured,
}

impl RemoteSink for CliRemote {
    async fn write(&self, key: ClientKey, payload: &ReportPayload) -> Result<ReportId, RemoteError> {
        match self {
            Self::Http(client) => client.write(key, payload).await,
            Self::Unconfigured => Err(RemoteError::Unreachable(
                "no API is configured".to_string(),
            )),
        }
    }
}

impl FeedSource for CliRemote {
    fn subscribe(
        &self,
        scope: &FeedScope,
        events: mpsc::UnboundedSender<SnapshotEvent>,
    ) -> SourceHandle {
        match self {
            Self::Http(client) => client.subscribe(scope, events),
            Self::Unconfigured => {
                let _ = events.send(Err(FeedError::Unavailable(
                    "no API is configured".to_string(),
                )));
                SourceHandle::new(|| {})
            }
        }
    }
}

/// How the CLI learns about connectivity.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityMode {
    /// Probe once at startup
    Snapshot,
    /// Keep probing in the background while someone listens
    Watch,
}

/// Open the queue and wire it to the configured remote.
pub async fn open_service(ctx: &CliContext, mode: ConnectivityMode) -> Result<CliService, CliError> {
    if let Some(parent) = ctx.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let client = ctx.http_client()?;
    let monitor = build_monitor(client.as_ref(), ctx, mode).await;
    let remote = client.map_or(CliRemote::Unconfigured, CliRemote::Http);

    let options = ServiceOptions {
        write_timeout: Some(ctx.config.write_timeout()),
        identity: Some(Arc::new(ctx.config.identity())),
        feed: FeedOptions::default(),
    };
    Ok(ReportingService::open_path(ctx.db_path.clone(), Arc::new(remote), monitor, options).await?)
}

async fn build_monitor(
    client: Option<&HttpReportsClient>,
    ctx: &CliContext,
    mode: ConnectivityMode,
) -> ConnectivityMonitor {
    let Some(client) = client.filter(|_| !ctx.offline) else {
        return ConnectivityMonitor::new(Connectivity::Offline);
    };

    let initial = Connectivity::from_connected(client.probe().await);
    tracing::debug!(?initial, base_url = client.base_url(), "Probed API reachability");
    match mode {
        ConnectivityMode::Snapshot => ConnectivityMonitor::new(initial),
        ConnectivityMode::Watch => {
            let probe = HttpReachabilityProbe::new(client.clone(), ctx.config.probe_interval());
            ConnectivityMonitor::with_observer(initial, Arc::new(probe))
        }
    }
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    if let Some(path) = env::var_os("VERDE_CONFIG").map(PathBuf::from) {
        return Ok(path);
    }
    dirs::config_dir()
        .map(|dir| dir.join("verde").join("config.json"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI config directory".to_string()))
}

pub fn load_config(path: &Path) -> Result<ClientConfig, CliError> {
    Ok(ClientConfig::load_from_path(path)?.with_env_overrides(|key| env::var(key).ok())?)
}

pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    config: &ClientConfig,
) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| config.queue_db_path.clone()) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_local_dir()
        .map(|dir| dir.join("verde").join("queue.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

#[derive(Debug, Serialize)]
pub struct PendingListItem {
    pub client_key: String,
    pub category: String,
    pub subcategory: String,
    pub description: String,
    pub address: String,
    pub enqueued_at: i64,
    pub enqueued_at_iso: String,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct RejectedListItem {
    #[serde(flatten)]
    pub submission: PendingListItem,
    pub reason: String,
    pub rejected_at: i64,
    pub rejected_at_iso: String,
}

pub fn pending_to_list_item(submission: &PendingSubmission, now_ms: i64) -> PendingListItem {
    let payload = &submission.payload;
    PendingListItem {
        client_key: submission.client_key.to_string(),
        category: payload.category.clone(),
        subcategory: payload.subcategory.clone(),
        description: payload.description.clone(),
        address: payload.address.clone(),
        enqueued_at: submission.enqueued_at,
        enqueued_at_iso: format_timestamp(submission.enqueued_at),
        relative_time: format_relative_time(submission.enqueued_at, now_ms),
    }
}

pub fn rejected_to_list_item(rejected: &RejectedSubmission, now_ms: i64) -> RejectedListItem {
    RejectedListItem {
        submission: pending_to_list_item(&rejected.submission, now_ms),
        reason: rejected.reason.clone(),
        rejected_at: rejected.rejected_at,
        rejected_at_iso: format_timestamp(rejected.rejected_at),
    }
}

pub fn format_pending_lines(submissions: &[PendingSubmission], now_ms: i64) -> Vec<String> {
    submissions
        .iter()
        .map(|submission| {
            format!(
                "{}  {:>8}  {}",
                short_key(&submission.client_key),
                format_relative_time(submission.enqueued_at, now_ms),
                preview(&submission.payload.description, PREVIEW_LEN)
            )
        })
        .collect()
}

pub fn format_rejected_lines(rejected: &[RejectedSubmission], now_ms: i64) -> Vec<String> {
    rejected
        .iter()
        .map(|item| {
            format!(
                "{}  {:>8}  {}  ({})",
                short_key(&item.submission.client_key),
                format_relative_time(item.rejected_at, now_ms),
                preview(&item.submission.payload.description, PREVIEW_LEN),
                item.reason
            )
        })
        .collect()
}

pub fn format_report_line(report: &RemoteReport, now_ms: i64) -> String {
    let marker = if report.is_confirmed() { ' ' } else { '~' };
    format!(
        "{marker} {:<10}  {:>8}  {}",
        report.id.as_str(),
        format_relative_time(report.created_at, now_ms),
        preview(&report.payload.description, PREVIEW_LEN)
    )
}

pub fn format_entry_line(entry: &FeedEntry, now_ms: i64) -> String {
    match entry {
        FeedEntry::Confirmed(report) => format_report_line(report, now_ms),
        FeedEntry::Pending(submission) => format!(
            "+ {:<10}  {:>8}  {}",
            "queued",
            format_relative_time(submission.enqueued_at, now_ms),
            preview(&submission.payload.description, PREVIEW_LEN)
        ),
    }
}

pub fn short_key(key: &ClientKey) -> String {
    key.to_string().chars().take(SHORT_KEY_LEN).collect()
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let truncated = single_line
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    format!("{}...", truncated.trim_end())
}

/// Resolve a full client key or unique prefix among rejected submissions.
pub fn resolve_rejected_key(
    query: &str,
    rejected: &[RejectedSubmission],
) -> Result<ClientKey, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::EmptyKey);
    }

    if let Ok(key) = query.parse::<ClientKey>() {
        if rejected.iter().any(|item| item.submission.client_key == key) {
            return Ok(key);
        }
    }

    let needle = query.to_ascii_lowercase();
    let matching = rejected
        .iter()
        .map(|item| item.submission.client_key)
        .filter(|key| key.to_string().starts_with(&needle))
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::KeyNotFound(query.to_string())),
        [key] => Ok(*key),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(short_key)
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousKey(format!(
                "Key prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |timestamp| timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
