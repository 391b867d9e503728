//! Visitor session tracker.
//!
//! One [`VisitorTracker`] represents one browsing context. It mints a session
//! identifier on first use, records page impressions and dwell-time
//! engagement, and hands every remote write to a background worker so the
//! caller never waits on the store. Write failures are logged and dropped.
//!
//! Lifecycle: `Uninitialized -> Active -> Stopped`. Stopping is terminal.

mod clock;
mod config;
mod writer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Environment, TrackingConfig};
pub use writer::{OutcomeSender, WriteKind, WriteOutcome};

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::repos::TrackingStore;
use crate::domain::pages::{
    EngagementUpdate, PageImpression, PageRef, clamp_scroll_depth, elapsed_ms,
};
use crate::domain::sessions::{ClientInfo, SessionId, VisitorSession};

use writer::{TrackingWrite, WriteQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    Uninitialized,
    Active,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct PageVisit {
    started_at: OffsetDateTime,
    scroll_depth: Option<i16>,
}

#[derive(Debug)]
struct TrackerState {
    phase: TrackerPhase,
    session_id: Option<SessionId>,
    visits: HashMap<PageRef, PageVisit>,
    queue: Option<WriteQueue>,
    last_activity: OffsetDateTime,
}

pub struct VisitorTracker {
    store: Arc<dyn TrackingStore>,
    config: TrackingConfig,
    client: ClientInfo,
    clock: Arc<dyn Clock>,
    observer: Option<OutcomeSender>,
    state: Mutex<TrackerState>,
}

impl VisitorTracker {
    pub fn new(store: Arc<dyn TrackingStore>, config: TrackingConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();
        Self {
            store,
            config,
            client: ClientInfo::default(),
            clock,
            observer: None,
            state: Mutex::new(TrackerState {
                phase: TrackerPhase::Uninitialized,
                session_id: None,
                visits: HashMap::new(),
                queue: None,
                last_activity: now,
            }),
        }
    }

    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client = client;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        self.clock = clock;
        self.state_mut().last_activity = now;
        self
    }

    /// Publish the outcome of every remote write to `observer`.
    pub fn with_observer(mut self, observer: OutcomeSender) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn phase(&self) -> TrackerPhase {
        self.lock_state().phase
    }

    pub fn last_activity(&self) -> OffsetDateTime {
        self.lock_state().last_activity
    }

    /// Current session identifier, minted on first call.
    pub fn session_id(&self) -> SessionId {
        let mut state = self.lock_state();
        self.ensure_session(&mut state)
    }

    /// Record one impression of `page`. Best-effort and non-blocking.
    pub fn track_page_view(&self, page: impl Into<PageRef>) {
        let page = page.into();
        let mut state = self.lock_state();
        let now = self.clock.now();
        state.last_activity = now;

        let session_id = self.ensure_session(&mut state);
        if state.phase == TrackerPhase::Stopped {
            debug!(
                target = "readtrail::tracker",
                page = %page,
                "tracker stopped; ignoring page view"
            );
            return;
        }
        if !self.config.writes_enabled() {
            return;
        }

        state.visits.insert(
            page.clone(),
            PageVisit {
                started_at: now,
                scroll_depth: None,
            },
        );
        enqueue(
            &state,
            TrackingWrite::Impression(PageImpression {
                id: Uuid::new_v4(),
                session_id,
                page_ref: page,
                created_at: now,
            }),
        );
    }

    /// Remember the deepest scroll position seen on an already viewed page.
    pub fn record_scroll_depth(&self, page: impl Into<PageRef>, percent: f64) {
        let page = page.into();
        let mut state = self.lock_state();
        state.last_activity = self.clock.now();
        if state.phase != TrackerPhase::Active {
            return;
        }

        let depth = clamp_scroll_depth(percent);
        if let Some(visit) = state.visits.get_mut(&page) {
            visit.scroll_depth = Some(visit.scroll_depth.map_or(depth, |seen| seen.max(depth)));
        }
    }

    /// Record dwell time on `page` since its last view. Best-effort and non-blocking.
    pub fn update_page_engagement(&self, page: impl Into<PageRef>) {
        let page = page.into();
        let mut state = self.lock_state();
        let now = self.clock.now();
        state.last_activity = now;

        if state.phase != TrackerPhase::Active || !self.config.writes_enabled() {
            return;
        }
        let Some(session_id) = state.session_id else {
            return;
        };
        let Some(visit) = state.visits.get(&page).copied() else {
            debug!(
                target = "readtrail::tracker",
                session_id = %session_id,
                page = %page,
                "no impression recorded for page; skipping engagement"
            );
            return;
        };

        enqueue(
            &state,
            TrackingWrite::Engagement(EngagementUpdate {
                session_id,
                page_ref: page,
                duration_ms: elapsed_ms(visit.started_at, now),
                scroll_depth: visit.scroll_depth,
                updated_at: now,
            }),
        );
    }

    /// Stop tracking for the rest of this browsing context. Idempotent.
    pub fn stop_tracking(&self) {
        let mut state = self.lock_state();
        if state.phase == TrackerPhase::Stopped {
            return;
        }
        state.phase = TrackerPhase::Stopped;
        state.visits.clear();
        // Already queued writes still drain.
        state.queue = None;

        if let Some(session_id) = state.session_id {
            info!(
                target = "readtrail::tracker",
                session_id = %session_id,
                "tracking stopped"
            );
        }
    }

    fn ensure_session(&self, state: &mut TrackerState) -> SessionId {
        if let Some(id) = state.session_id {
            return id;
        }

        let id = SessionId::new_random();
        state.session_id = Some(id);
        if state.phase == TrackerPhase::Stopped {
            return id;
        }
        state.phase = TrackerPhase::Active;

        if self.config.writes_enabled() {
            state.queue = WriteQueue::spawn(self.store.clone(), self.observer.clone());
            let session = VisitorSession::start(id, &self.client, self.clock.now());
            info!(
                target = "readtrail::tracker",
                session_id = %id,
                device = %session.device_kind,
                "visitor session started"
            );
            enqueue(state, TrackingWrite::Session(session));
        } else {
            debug!(
                target = "readtrail::tracker",
                session_id = %id,
                environment = %self.config.environment,
                "tracking disabled; session kept in memory only"
            );
        }

        id
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_mut(&mut self) -> &mut TrackerState {
        self.state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn enqueue(state: &TrackerState, write: TrackingWrite) {
    if let Some(queue) = state.queue.as_ref() {
        queue.push(write);
    }
}
