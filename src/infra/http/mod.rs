mod collector;
mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};

use crate::application::analytics::AnalyticsService;
use crate::application::registry::SessionRegistry;
use crate::application::repos::TrackingStore;

pub use collector::{
    AnalyticsQuery, OpenSessionRequest, OpenSessionResponse, PageRequest, ScrollRequest,
};
pub use middleware::RequestContext;

#[derive(Clone)]
pub struct CollectorState {
    pub registry: Arc<SessionRegistry>,
    pub analytics: Arc<AnalyticsService>,
    pub store: Arc<dyn TrackingStore>,
}

pub fn build_router(state: CollectorState) -> Router {
    Router::new()
        .route("/api/v1/sessions", post(collector::open_session))
        .route("/api/v1/sessions/{id}", delete(collector::close_session))
        .route("/api/v1/sessions/{id}/views", post(collector::record_view))
        .route(
            "/api/v1/sessions/{id}/scroll",
            post(collector::record_scroll),
        )
        .route(
            "/api/v1/sessions/{id}/engagement",
            post(collector::record_engagement),
        )
        .route("/api/v1/analytics/pages", get(collector::page_summaries))
        .route("/health", get(collector::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
