//! Collector handlers: browsers report views, scroll and dwell for a server-held session.

use std::{str::FromStr, sync::Arc};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{
    HeaderMap, StatusCode,
    header::{REFERER, USER_AGENT},
};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::application::analytics::{DEFAULT_SUMMARY_LIMIT, DEFAULT_WINDOW_HOURS, window_start};
use crate::application::error::{AppError, ErrorReport};
use crate::application::tracker::VisitorTracker;
use crate::domain::error::DomainError;
use crate::domain::pages::PageRef;
use crate::domain::sessions::{ClientInfo, SessionId};

use super::CollectorState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OpenSessionRequest {
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OpenSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct PageRequest {
    pub page: String,
}

#[derive(Debug, Deserialize)]
pub struct ScrollRequest {
    pub page: String,
    pub percent: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AnalyticsQuery {
    pub since_hours: Option<u32>,
    pub limit: Option<u32>,
}

pub async fn open_session(
    State(state): State<CollectorState>,
    headers: HeaderMap,
    Json(body): Json<OpenSessionRequest>,
) -> impl IntoResponse {
    let user_agent = non_blank(body.user_agent).or_else(|| header_text(&headers, USER_AGENT));
    let referrer = non_blank(body.referrer).or_else(|| header_text(&headers, REFERER));

    let (session_id, _) = state.registry.open(ClientInfo::new(user_agent, referrer));
    (
        StatusCode::CREATED,
        Json(OpenSessionResponse { session_id }),
    )
}

pub async fn record_view(
    State(state): State<CollectorState>,
    Path(id): Path<String>,
    Json(body): Json<PageRequest>,
) -> Result<StatusCode, AppError> {
    let tracker = lookup(&state, &id)?;
    tracker.track_page_view(parse_page(&body.page)?);
    Ok(StatusCode::ACCEPTED)
}

pub async fn record_scroll(
    State(state): State<CollectorState>,
    Path(id): Path<String>,
    Json(body): Json<ScrollRequest>,
) -> Result<StatusCode, AppError> {
    let tracker = lookup(&state, &id)?;
    if !body.percent.is_finite() {
        return Err(rejected(
            "percent",
            AppError::validation("scroll percent must be a finite number"),
        ));
    }
    tracker.record_scroll_depth(parse_page(&body.page)?, body.percent);
    Ok(StatusCode::ACCEPTED)
}

pub async fn record_engagement(
    State(state): State<CollectorState>,
    Path(id): Path<String>,
    Json(body): Json<PageRequest>,
) -> Result<StatusCode, AppError> {
    let tracker = lookup(&state, &id)?;
    tracker.update_page_engagement(parse_page(&body.page)?);
    Ok(StatusCode::ACCEPTED)
}

pub async fn close_session(
    State(state): State<CollectorState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_session_id(&id)?;
    if state.registry.close(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(rejected("unknown_session", unknown_session()))
    }
}

pub async fn page_summaries(
    State(state): State<CollectorState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let since = window_start(
        OffsetDateTime::now_utc(),
        query.since_hours.unwrap_or(DEFAULT_WINDOW_HOURS),
    );
    let summaries = state
        .analytics
        .page_summaries(since, query.limit.unwrap_or(DEFAULT_SUMMARY_LIMIT))
        .await?;
    Ok(Json(summaries))
}

pub async fn health(State(state): State<CollectorState>) -> Response {
    match state.store.health_check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

fn lookup(state: &CollectorState, raw_id: &str) -> Result<Arc<VisitorTracker>, AppError> {
    let id = parse_session_id(raw_id)?;
    state
        .registry
        .get(&id)
        .ok_or_else(|| rejected("unknown_session", unknown_session()))
}

fn unknown_session() -> AppError {
    DomainError::not_found("session").into()
}

fn parse_session_id(raw: &str) -> Result<SessionId, AppError> {
    SessionId::from_str(raw).map_err(|err| rejected("session_id", err.into()))
}

fn parse_page(raw: &str) -> Result<PageRef, AppError> {
    PageRef::parse(raw).map_err(|err| rejected("page", err.into()))
}

fn rejected(reason: &'static str, err: AppError) -> AppError {
    counter!("readtrail_collector_rejected_total", "reason" => reason).increment(1);
    err
}

fn header_text(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| non_blank(Some(value.to_string())))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
