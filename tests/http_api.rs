use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use readtrail::application::analytics::AnalyticsService;
use readtrail::application::registry::SessionRegistry;
use readtrail::application::repos::{AnalyticsRepo, RepoError, TrackingStore};
use readtrail::application::tracker::{SystemClock, TrackingConfig, WriteKind, WriteOutcome};
use readtrail::domain::pages::{EngagementUpdate, PageImpression, PageRef};
use readtrail::domain::sessions::{DeviceKind, SessionId, VisitorSession};
use readtrail::infra::http::{CollectorState, build_router};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

#[derive(Default)]
struct MemoryStore {
    sessions: Mutex<Vec<VisitorSession>>,
    impressions: Mutex<Vec<PageImpression>>,
    engagement: Mutex<Vec<EngagementUpdate>>,
    unhealthy: bool,
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn insert_session(&self, session: &VisitorSession) -> Result<(), RepoError> {
        self.sessions.lock().unwrap().push(session.clone());
        Ok(())
    }

    async fn insert_impression(&self, impression: &PageImpression) -> Result<(), RepoError> {
        self.impressions.lock().unwrap().push(impression.clone());
        Ok(())
    }

    async fn upsert_engagement(&self, update: &EngagementUpdate) -> Result<(), RepoError> {
        self.engagement.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        if self.unhealthy {
            Err(RepoError::Timeout)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AnalyticsRepo for MemoryStore {
    async fn list_impressions_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<PageImpression>, RepoError> {
        Ok(self
            .impressions
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.created_at >= since)
            .cloned()
            .collect())
    }

    async fn list_engagement_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<EngagementUpdate>, RepoError> {
        Ok(self
            .engagement
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.updated_at >= since)
            .cloned()
            .collect())
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    registry: Arc<SessionRegistry>,
    outcomes: mpsc::UnboundedReceiver<WriteOutcome>,
}

fn test_app(store: MemoryStore) -> TestApp {
    let store = Arc::new(store);
    let (tx, outcomes) = mpsc::unbounded_channel();
    let registry = Arc::new(
        SessionRegistry::new(
            store.clone(),
            TrackingConfig::default(),
            Arc::new(SystemClock),
            time::Duration::minutes(30),
        )
        .with_observer(tx),
    );
    let state = CollectorState {
        registry: registry.clone(),
        analytics: Arc::new(AnalyticsService::new(store.clone())),
        store: store.clone(),
    };

    TestApp {
        router: build_router(state),
        store,
        registry,
        outcomes,
    }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::USER_AGENT, "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile");
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build");

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes()
        .to_vec();
    (status, bytes)
}

async fn open_session(router: &Router) -> String {
    let (status, body) = send(router, Method::POST, "/api/v1/sessions", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let body: Value = serde_json::from_slice(&body).expect("json body");
    body["session_id"]
        .as_str()
        .expect("session id string")
        .to_string()
}

async fn next_outcome(outcomes: &mut mpsc::UnboundedReceiver<WriteOutcome>) -> WriteOutcome {
    tokio::time::timeout(Duration::from_secs(2), outcomes.recv())
        .await
        .expect("write outcome within timeout")
        .expect("observer channel open")
}

#[tokio::test]
async fn open_session_falls_back_to_user_agent_header() {
    let mut app = test_app(MemoryStore::default());

    let id = open_session(&app.router).await;
    assert!(id.parse::<SessionId>().is_ok());
    assert_eq!(app.registry.len(), 1);

    let outcome = next_outcome(&mut app.outcomes).await;
    assert_eq!(outcome.kind, WriteKind::Session);
    assert!(outcome.is_success());

    let sessions = app.store.sessions.lock().unwrap().clone();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id.to_string(), id);
    assert_eq!(sessions[0].device_kind, DeviceKind::Mobile);
}

#[tokio::test]
async fn view_scroll_and_engagement_are_written_in_order() {
    let mut app = test_app(MemoryStore::default());
    let id = open_session(&app.router).await;

    let (status, _) = send(
        &app.router,
        Method::POST,
        &format!("/api/v1/sessions/{id}/views"),
        Some(json!({ "page": "42" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(
        &app.router,
        Method::POST,
        &format!("/api/v1/sessions/{id}/scroll"),
        Some(json!({ "page": "42", "percent": 64.4 })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = send(
        &app.router,
        Method::POST,
        &format!("/api/v1/sessions/{id}/engagement"),
        Some(json!({ "page": "42" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let kinds = [
        next_outcome(&mut app.outcomes).await.kind,
        next_outcome(&mut app.outcomes).await.kind,
        next_outcome(&mut app.outcomes).await.kind,
    ];
    assert_eq!(
        kinds,
        [WriteKind::Session, WriteKind::Impression, WriteKind::Engagement]
    );

    let engagement = app.store.engagement.lock().unwrap().clone();
    assert_eq!(engagement.len(), 1);
    assert_eq!(engagement[0].page_ref, PageRef::from(42_i64));
    assert_eq!(engagement[0].scroll_depth, Some(64));
    assert!(engagement[0].duration_ms >= 0);
}

#[tokio::test]
async fn closed_session_is_forgotten() {
    let app = test_app(MemoryStore::default());
    let id = open_session(&app.router).await;

    let uri = format!("/api/v1/sessions/{id}");
    let (status, _) = send(&app.router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(app.registry.is_empty());

    let (status, _) = send(&app.router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app.router,
        Method::POST,
        &format!("{uri}/views"),
        Some(json!({ "page": "home" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_input_is_rejected() {
    let app = test_app(MemoryStore::default());

    let (status, _) = send(
        &app.router,
        Method::POST,
        "/api/v1/sessions/not-a-uuid/views",
        Some(json!({ "page": "home" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = Uuid::new_v4();
    let (status, _) = send(
        &app.router,
        Method::POST,
        &format!("/api/v1/sessions/{unknown}/engagement"),
        Some(json!({ "page": "home" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let id = open_session(&app.router).await;
    let (status, _) = send(
        &app.router,
        Method::POST,
        &format!("/api/v1/sessions/{id}/views"),
        Some(json!({ "page": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.store.impressions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn analytics_summarizes_recorded_pages() {
    let app = test_app(MemoryStore::default());
    let now = OffsetDateTime::now_utc();
    let session = SessionId::new_random();
    {
        let mut impressions = app.store.impressions.lock().unwrap();
        for page in ["home", "home", "about"] {
            impressions.push(PageImpression {
                id: Uuid::new_v4(),
                session_id: session,
                page_ref: PageRef::from(page),
                created_at: now,
            });
        }
        app.store.engagement.lock().unwrap().push(EngagementUpdate {
            session_id: session,
            page_ref: PageRef::from("home"),
            duration_ms: 3_000,
            scroll_depth: Some(75),
            updated_at: now,
        });
    }

    let (status, body) = send(
        &app.router,
        Method::GET,
        "/api/v1/analytics/pages?since_hours=1&limit=1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&body).expect("json body");
    let rows = body.as_array().expect("array body");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["page_ref"], "home");
    assert_eq!(rows[0]["impressions"], 2);
    assert_eq!(rows[0]["avg_duration_ms"], 3_000);
    assert_eq!(rows[0]["max_scroll_depth"], 75);
}

#[tokio::test]
async fn health_follows_store_check() {
    let app = test_app(MemoryStore::default());
    let (status, _) = send(&app.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let app = test_app(MemoryStore {
        unhealthy: true,
        ..MemoryStore::default()
    });
    let (status, _) = send(&app.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
