//! Stored row shapes shared by the Postgres and REST adapters.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::domain::pages::{EngagementUpdate, PageImpression, PageRef};

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub(crate) struct ImpressionRow {
    id: Uuid,
    session_id: Uuid,
    page_ref: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl From<&PageImpression> for ImpressionRow {
    fn from(impression: &PageImpression) -> Self {
        Self {
            id: impression.id,
            session_id: impression.session_id.as_uuid(),
            page_ref: impression.page_ref.to_string(),
            created_at: impression.created_at,
        }
    }
}

impl TryFrom<ImpressionRow> for PageImpression {
    type Error = RepoError;

    fn try_from(row: ImpressionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            session_id: row.session_id.into(),
            page_ref: stored_page_ref(&row.page_ref)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub(crate) struct EngagementRow {
    session_id: Uuid,
    page_ref: String,
    duration_ms: i64,
    scroll_depth: Option<i16>,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

impl From<&EngagementUpdate> for EngagementRow {
    fn from(update: &EngagementUpdate) -> Self {
        Self {
            session_id: update.session_id.as_uuid(),
            page_ref: update.page_ref.to_string(),
            duration_ms: update.duration_ms,
            scroll_depth: update.scroll_depth,
            updated_at: update.updated_at,
        }
    }
}

impl TryFrom<EngagementRow> for EngagementUpdate {
    type Error = RepoError;

    fn try_from(row: EngagementRow) -> Result<Self, Self::Error> {
        Ok(Self {
            session_id: row.session_id.into(),
            page_ref: stored_page_ref(&row.page_ref)?,
            duration_ms: row.duration_ms,
            scroll_depth: row.scroll_depth,
            updated_at: row.updated_at,
        })
    }
}

/// A stored page ref that no longer validates means the table was written around us.
fn stored_page_ref(value: &str) -> Result<PageRef, RepoError> {
    PageRef::parse(value).map_err(|err| RepoError::Integrity {
        message: err.to_string(),
    })
}
