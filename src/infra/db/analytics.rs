use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{AnalyticsRepo, RepoError};
use crate::domain::pages::{EngagementUpdate, PageImpression};
use crate::infra::rows::{EngagementRow, ImpressionRow};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl AnalyticsRepo for PostgresRepositories {
    async fn list_impressions_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<PageImpression>, RepoError> {
        let rows = sqlx::query_as::<_, ImpressionRow>(
            r#"
            SELECT id, session_id, page_ref, created_at
            FROM page_impressions
            WHERE created_at >= $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(PageImpression::try_from).collect()
    }

    async fn list_engagement_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<EngagementUpdate>, RepoError> {
        let rows = sqlx::query_as::<_, EngagementRow>(
            r#"
            SELECT session_id, page_ref, duration_ms, scroll_depth, updated_at
            FROM page_engagement
            WHERE updated_at >= $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(EngagementUpdate::try_from).collect()
    }
}
