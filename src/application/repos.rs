//! Repository traits describing the remote row-store the tracker writes to.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::pages::{EngagementUpdate, PageImpression};
use crate::domain::sessions::VisitorSession;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("store timeout")]
    Timeout,
    #[error("remote store responded with status {status}: {body}")]
    Remote { status: u16, body: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Write side of the tracking tables: `visitor_sessions`, `page_impressions`, `page_engagement`.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn insert_session(&self, session: &VisitorSession) -> Result<(), RepoError>;

    async fn insert_impression(&self, impression: &PageImpression) -> Result<(), RepoError>;

    /// Insert or replace the engagement row keyed by `(session_id, page_ref)`.
    async fn upsert_engagement(&self, update: &EngagementUpdate) -> Result<(), RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;
}

/// Read side used by engagement aggregation.
#[async_trait]
pub trait AnalyticsRepo: Send + Sync {
    async fn list_impressions_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<PageImpression>, RepoError>;

    async fn list_engagement_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<EngagementUpdate>, RepoError>;
}
