use async_trait::async_trait;
use sqlx::query;

use crate::application::repos::{RepoError, TrackingStore};
use crate::domain::pages::{EngagementUpdate, PageImpression};
use crate::domain::sessions::VisitorSession;

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl TrackingStore for PostgresRepositories {
    async fn insert_session(&self, session: &VisitorSession) -> Result<(), RepoError> {
        query(
            r#"
            INSERT INTO visitor_sessions (id, user_agent, device_kind, referrer, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.user_agent.as_deref())
        .bind(session.device_kind.as_str())
        .bind(session.referrer.as_deref())
        .bind(session.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn insert_impression(&self, impression: &PageImpression) -> Result<(), RepoError> {
        query(
            r#"
            INSERT INTO page_impressions (id, session_id, page_ref, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(impression.id)
        .bind(impression.session_id.as_uuid())
        .bind(impression.page_ref.as_str())
        .bind(impression.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn upsert_engagement(&self, update: &EngagementUpdate) -> Result<(), RepoError> {
        query(
            r#"
            INSERT INTO page_engagement (session_id, page_ref, duration_ms, scroll_depth, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id, page_ref) DO UPDATE
            SET duration_ms = EXCLUDED.duration_ms,
                scroll_depth = EXCLUDED.scroll_depth,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(update.session_id.as_uuid())
        .bind(update.page_ref.as_str())
        .bind(update.duration_ms)
        .bind(update.scroll_depth)
        .bind(update.updated_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.ping().await.map_err(map_sqlx_error)
    }
}
