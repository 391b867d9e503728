//! Hosted REST row-store adapter (PostgREST dialect).
//!
//! Writes go to `POST {base}/rest/v1/{table}` authenticated with the project
//! API key; engagement rows are upserted on `(session_id, page_ref)`.

mod rows;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode, Url,
    header::{AUTHORIZATION, CONTENT_RANGE, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::debug;

use crate::application::repos::{AnalyticsRepo, RepoError, TrackingStore};
use crate::domain::pages::{EngagementUpdate, PageImpression};
use crate::domain::sessions::VisitorSession;
use crate::infra::error::InfraError;

use crate::infra::rows::{EngagementRow, ImpressionRow};
use rows::SessionRow;

pub const SESSIONS_TABLE: &str = "visitor_sessions";
pub const IMPRESSIONS_TABLE: &str = "page_impressions";
pub const ENGAGEMENT_TABLE: &str = "page_engagement";

const ENGAGEMENT_CONFLICT_COLUMNS: &str = "session_id,page_ref";
const PREFER_MINIMAL: &str = "return=minimal";
const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=minimal";
const PREFER_COUNT: &str = "count=exact";
/// PostgREST's default `max-rows`.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Clone, Debug)]
pub struct RestRowStore {
    client: Client,
    base: Url,
    api_key: String,
    page_size: usize,
}

impl RestRowStore {
    pub fn new(base: &Url, api_key: impl Into<String>, timeout: Duration) -> Result<Self, InfraError> {
        let api_key = api_key.into();
        HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|err| InfraError::configuration(format!("invalid rest api key: {err}")))?;

        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            base,
            api_key,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Rows requested per select; clamped to at least one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn user_agent() -> &'static str {
        concat!("readtrail/", env!("CARGO_PKG_VERSION"))
    }

    fn table_url(&self, table: &str) -> Result<Url, RepoError> {
        self.base
            .join(&format!("rest/v1/{table}"))
            .map_err(|err| RepoError::InvalidInput {
                message: err.to_string(),
            })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
    }

    async fn insert<T: Serialize + Sync>(
        &self,
        table: &str,
        row: &T,
        on_conflict: Option<&str>,
    ) -> Result<(), RepoError> {
        let mut url = self.table_url(table)?;
        let prefer = match on_conflict {
            Some(columns) => {
                url.query_pairs_mut().append_pair("on_conflict", columns);
                PREFER_UPSERT
            }
            None => PREFER_MINIMAL,
        };

        let response = self
            .authorized(self.client.post(url))
            .header("prefer", prefer)
            .json(row)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        ensure_success(response).await.map(|_| ())
    }

    async fn select_since<T: DeserializeOwned>(
        &self,
        table: &str,
        column: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<T>, RepoError> {
        let since = since.format(&Rfc3339).map_err(|err| RepoError::InvalidInput {
            message: err.to_string(),
        })?;

        let mut rows = Vec::new();
        loop {
            let mut url = self.table_url(table)?;
            url.query_pairs_mut()
                .append_pair("select", "*")
                .append_pair(column, &format!("gte.{since}"))
                .append_pair("order", &format!("{column}.asc"))
                .append_pair("limit", &self.page_size.to_string())
                .append_pair("offset", &rows.len().to_string());

            let response = self
                .authorized(self.client.get(url))
                .header("prefer", PREFER_COUNT)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            let response = ensure_success(response).await?;
            let total = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(content_range_total);

            let bytes = response.bytes().await.map_err(map_reqwest_error)?;
            let page: Vec<T> = serde_json::from_slice(&bytes).map_err(|err| {
                RepoError::Integrity {
                    message: format!("failed to parse `{table}` rows: {err}"),
                }
            })?;
            let fetched = page.len();
            rows.extend(page);

            // The server may cap pages below `limit`; only the reported total is authoritative.
            let more = match total {
                Some(total) => fetched > 0 && rows.len() < total,
                None => fetched == self.page_size,
            };
            if !more {
                break;
            }
            debug!(
                target = "readtrail::rest",
                table,
                fetched = rows.len(),
                total = ?total,
                "fetching next row page"
            );
        }

        Ok(rows)
    }
}

#[async_trait]
impl TrackingStore for RestRowStore {
    async fn insert_session(&self, session: &VisitorSession) -> Result<(), RepoError> {
        self.insert(SESSIONS_TABLE, &SessionRow::from(session), None)
            .await
    }

    async fn insert_impression(&self, impression: &PageImpression) -> Result<(), RepoError> {
        self.insert(IMPRESSIONS_TABLE, &ImpressionRow::from(impression), None)
            .await
    }

    async fn upsert_engagement(&self, update: &EngagementUpdate) -> Result<(), RepoError> {
        self.insert(
            ENGAGEMENT_TABLE,
            &EngagementRow::from(update),
            Some(ENGAGEMENT_CONFLICT_COLUMNS),
        )
        .await
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        let mut url = self.table_url(SESSIONS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("select", "id")
            .append_pair("limit", "1");

        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        ensure_success(response).await.map(|_| ())
    }
}

#[async_trait]
impl AnalyticsRepo for RestRowStore {
    async fn list_impressions_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<PageImpression>, RepoError> {
        let rows: Vec<ImpressionRow> = self
            .select_since(IMPRESSIONS_TABLE, "created_at", since)
            .await?;
        rows.into_iter().map(PageImpression::try_from).collect()
    }

    async fn list_engagement_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<EngagementUpdate>, RepoError> {
        let rows: Vec<EngagementRow> = self
            .select_since(ENGAGEMENT_TABLE, "updated_at", since)
            .await?;
        rows.into_iter().map(EngagementUpdate::try_from).collect()
    }
}

async fn ensure_success(response: Response) -> Result<Response, RepoError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(
        target = "readtrail::rest",
        status = status.as_u16(),
        body = %body,
        "row-store rejected request"
    );
    Err(match status {
        StatusCode::NOT_FOUND => RepoError::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RepoError::Timeout,
        _ => RepoError::Remote {
            status: status.as_u16(),
            body,
        },
    })
}

/// Total row count from a `Content-Range` value such as `0-999/4096`; `None` for `*`.
fn content_range_total(value: &str) -> Option<usize> {
    let (_, total) = value.trim().split_once('/')?;
    total.parse().ok()
}

fn map_reqwest_error(err: reqwest::Error) -> RepoError {
    if err.is_timeout() {
        RepoError::Timeout
    } else {
        RepoError::from_persistence(err)
    }
}
