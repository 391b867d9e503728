//! Engagement aggregation over recorded impressions and dwell updates.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::application::repos::{AnalyticsRepo, RepoError};
use crate::domain::pages::{EngagementUpdate, PageImpression, PageRef};
use crate::domain::sessions::SessionId;

pub const MAX_SUMMARY_LIMIT: u32 = 500;
pub const DEFAULT_SUMMARY_LIMIT: u32 = 50;
pub const DEFAULT_WINDOW_HOURS: u32 = 168;

/// Start of a reporting window reaching `hours` back from `now`.
pub fn window_start(now: OffsetDateTime, hours: u32) -> OffsetDateTime {
    now - Duration::hours(i64::from(hours))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageEngagementSummary {
    pub page_ref: PageRef,
    pub impressions: u64,
    pub sessions: u64,
    pub engaged: u64,
    pub avg_duration_ms: Option<i64>,
    pub max_scroll_depth: Option<i16>,
}

#[derive(Clone)]
pub struct AnalyticsService {
    repo: Arc<dyn AnalyticsRepo>,
}

impl AnalyticsService {
    pub fn new(repo: Arc<dyn AnalyticsRepo>) -> Self {
        Self { repo }
    }

    pub async fn page_summaries(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<PageEngagementSummary>, RepoError> {
        let impressions = self.repo.list_impressions_since(since).await?;
        let engagement = self.repo.list_engagement_since(since).await?;

        let mut summaries = summarize(&impressions, &engagement);
        summaries.truncate(limit.clamp(1, MAX_SUMMARY_LIMIT) as usize);
        Ok(summaries)
    }
}

#[derive(Default)]
struct Accumulator {
    impressions: u64,
    sessions: HashSet<SessionId>,
    engaged: u64,
    duration_total: i128,
    max_scroll_depth: Option<i16>,
}

/// Fold raw rows into per-page summaries, busiest pages first.
pub fn summarize(
    impressions: &[PageImpression],
    engagement: &[EngagementUpdate],
) -> Vec<PageEngagementSummary> {
    let mut pages: BTreeMap<&PageRef, Accumulator> = BTreeMap::new();

    for impression in impressions {
        let acc = pages.entry(&impression.page_ref).or_default();
        acc.impressions += 1;
        acc.sessions.insert(impression.session_id);
    }

    for update in engagement {
        let acc = pages.entry(&update.page_ref).or_default();
        acc.engaged += 1;
        acc.duration_total += i128::from(update.duration_ms);
        if let Some(depth) = update.scroll_depth {
            acc.max_scroll_depth = Some(acc.max_scroll_depth.map_or(depth, |seen| seen.max(depth)));
        }
    }

    let mut summaries: Vec<PageEngagementSummary> = pages
        .into_iter()
        .map(|(page_ref, acc)| PageEngagementSummary {
            page_ref: page_ref.clone(),
            impressions: acc.impressions,
            sessions: acc.sessions.len() as u64,
            engaged: acc.engaged,
            avg_duration_ms: (acc.engaged > 0).then(|| {
                let avg = acc.duration_total / i128::from(acc.engaged);
                i64::try_from(avg).unwrap_or(i64::MAX)
            }),
            max_scroll_depth: acc.max_scroll_depth,
        })
        .collect();

    // BTreeMap already yields page refs ascending; a stable sort keeps that as the tiebreak.
    summaries.sort_by(|a, b| b.impressions.cmp(&a.impressions));
    summaries
}
