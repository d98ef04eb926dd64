//! HTTP client for the managed incidents API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{FeedError, FeedSource, RemoteError, RemoteSink, SnapshotEvent, SourceHandle};
use crate::cache::TtlCache;
use crate::connectivity::{ConnectivityListener, ConnectivityObserver, ListenerHandle};
use crate::error::{Error, Result};
use crate::feed::FeedScope;
use crate::models::{Category, ClientKey, FeedRecord, RemoteReport, ReportId, ReportPayload};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_CATEGORIES_TTL: Duration = Duration::from_secs(60 * 60);
const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Reports API client implementing both the write sink and a polling feed.
#[derive(Clone)]
pub struct HttpReportsClient {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
    poll_interval: Duration,
    categories_ttl: Duration,
    categories: Arc<TtlCache<(), Vec<Category>>>,
}

impl HttpReportsClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let base_url = normalize_endpoint(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            client,
            request_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            categories_ttl: DEFAULT_CATEGORIES_TTL,
            categories: Arc::new(TtlCache::new()),
        })
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub const fn with_categories_ttl(mut self, categories_ttl: Duration) -> Self {
        self.categories_ttl = categories_ttl;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One-shot fetch of the reports visible in `scope`.
    pub async fn fetch_reports(&self, scope: &FeedScope) -> std::result::Result<Vec<FeedRecord>, FeedError> {
        let mut request = self
            .client
            .get(format!("{}/v1/incidents", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(user_id) = scope.author() {
            request = request.query(&[("userId", user_id)]);
        }

        let response = request
            .send()
            .await
            .map_err(|error| FeedError::Unavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = parse_api_error(status, &body);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    FeedError::PermissionDenied(message)
                }
                _ => FeedError::Unavailable(message),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|error| FeedError::Unavailable(error.to_string()))?;
        let reports = serde_json::from_str::<Vec<RemoteReport>>(&body)
            .map_err(|error| FeedError::Decode(error.to_string()))?;
        Ok(reports.into_iter().map(FeedRecord::confirmed).collect())
    }

    /// Category catalog, served from cache while fresh.
    pub async fn categories(&self) -> std::result::Result<Vec<Category>, RemoteError> {
        self.categories
            .get_or_populate((), self.categories_ttl, || self.fetch_categories())
            .await
    }

    /// Drop the cached category catalog.
    pub async fn refresh_categories(&self) {
        self.categories.invalidate_all().await;
    }

    async fn fetch_categories(&self) -> std::result::Result<Vec<Category>, RemoteError> {
        let response = self
            .client
            .get(format!("{}/v1/categories", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|error| self.transport_error(&error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let categories = response
            .json::<Vec<Category>>()
            .await
            .map_err(|error| RemoteError::Unreachable(format!("invalid categories payload: {error}")))?;
        tracing::debug!(count = categories.len(), "Fetched category catalog");
        Ok(categories)
    }

    /// Health check used for reachability probing.
    pub async fn probe(&self) -> bool {
        match self
            .client
            .get(format!("{}/v1/health", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!("Reachability probe failed: {error}");
                false
            }
        }
    }

    fn transport_error(&self, error: &reqwest::Error) -> RemoteError {
        if error.is_timeout() {
            RemoteError::Timeout(self.request_timeout)
        } else {
            RemoteError::Unreachable(error.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedIncident {
    id: String,
}

impl RemoteSink for HttpReportsClient {
    async fn write(
        &self,
        key: ClientKey,
        payload: &ReportPayload,
    ) -> std::result::Result<ReportId, RemoteError> {
        let response = self
            .client
            .post(format!("{}/v1/incidents", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .header(IDEMPOTENCY_KEY_HEADER, key.to_string())
            .json(payload)
            .send()
            .await
            .map_err(|error| self.transport_error(&error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let created = response
            .json::<CreatedIncident>()
            .await
            .map_err(|error| RemoteError::Unreachable(format!("invalid create response: {error}")))?;
        let id = normalize_text_option(Some(created.id)).ok_or_else(|| {
            RemoteError::Unreachable("create response did not include an id".to_string())
        })?;
        Ok(ReportId::new(id))
    }
}

impl FeedSource for HttpReportsClient {
    fn subscribe(
        &self,
        scope: &FeedScope,
        events: mpsc::UnboundedSender<SnapshotEvent>,
    ) -> SourceHandle {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            let _ = events.send(Err(FeedError::Unavailable(
                "no async runtime to poll the feed".to_string(),
            )));
            return SourceHandle::new(|| {});
        };

        let client = self.clone();
        let scope = scope.clone();
        let task = runtime.spawn(async move {
            let mut last: Option<Vec<FeedRecord>> = None;
            loop {
                let event = client.fetch_reports(&scope).await;
                let changed = match (&event, &last) {
                    (Ok(records), Some(previous)) => records != previous,
                    _ => true,
                };
                last = event.as_ref().ok().cloned();

                if changed && events.send(event).is_err() {
                    break;
                }
                tokio::time::sleep(client.poll_interval).await;
            }
        });

        SourceHandle::new(move || task.abort())
    }
}

/// Polls the API health endpoint and reports reachability to the monitor.
pub struct HttpReachabilityProbe {
    client: HttpReportsClient,
    interval: Duration,
}

impl HttpReachabilityProbe {
    pub const fn new(client: HttpReportsClient, interval: Duration) -> Self {
        Self { client, interval }
    }
}

impl ConnectivityObserver for HttpReachabilityProbe {
    fn add_listener(&self, listener: ConnectivityListener) -> ListenerHandle {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; reachability probing disabled");
            return ListenerHandle::noop();
        };

        let client = self.client.clone();
        let interval = self.interval;
        let task = runtime.spawn(async move {
            loop {
                listener(client.probe().await);
                tokio::time::sleep(interval).await;
            }
        });

        ListenerHandle::new(move || task.abort())
    }
}

/// Map a non-success status to retryable or terminal.
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        RemoteError::Rejected(message)
    } else {
        RemoteError::Unreachable(message)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("API base URL must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}
