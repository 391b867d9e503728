//! Server-side map of live trackers for browsers that report through the collector.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::gauge;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use crate::application::repos::TrackingStore;
use crate::application::tracker::{Clock, OutcomeSender, TrackingConfig, VisitorTracker};
use crate::domain::sessions::{ClientInfo, SessionId};

pub struct SessionRegistry {
    store: Arc<dyn TrackingStore>,
    config: TrackingConfig,
    clock: Arc<dyn Clock>,
    idle_timeout: Duration,
    observer: Option<OutcomeSender>,
    trackers: DashMap<SessionId, Arc<VisitorTracker>>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        config: TrackingConfig,
        clock: Arc<dyn Clock>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            idle_timeout,
            observer: None,
            trackers: DashMap::new(),
        }
    }

    pub fn with_observer(mut self, observer: OutcomeSender) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Mint a tracker for a new browsing context and activate its session.
    pub fn open(&self, client: ClientInfo) -> (SessionId, Arc<VisitorTracker>) {
        let mut tracker = VisitorTracker::new(self.store.clone(), self.config)
            .with_client(client)
            .with_clock(self.clock.clone());
        if let Some(observer) = self.observer.clone() {
            tracker = tracker.with_observer(observer);
        }

        let tracker = Arc::new(tracker);
        let id = tracker.session_id();
        self.trackers.insert(id, tracker.clone());
        self.publish_len();
        (id, tracker)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<VisitorTracker>> {
        self.trackers.get(id).map(|entry| entry.value().clone())
    }

    /// Stop and forget a tracker. Returns `false` when the session is unknown.
    pub fn close(&self, id: &SessionId) -> bool {
        let Some((_, tracker)) = self.trackers.remove(id) else {
            return false;
        };
        tracker.stop_tracking();
        self.publish_len();
        true
    }

    /// Stop and forget every tracker idle for longer than the configured timeout.
    pub fn sweep_idle(&self) -> usize {
        let cutoff = self.clock.now() - self.idle_timeout;
        let expired: Vec<SessionId> = self
            .trackers
            .iter()
            .filter(|entry| entry.value().last_activity() < cutoff)
            .map(|entry| *entry.key())
            .collect();

        let removed = expired
            .into_iter()
            .filter(|id| self.expire_if_idle(id, cutoff))
            .count();

        if removed > 0 {
            info!(
                target = "readtrail::registry",
                removed,
                remaining = self.trackers.len(),
                "swept idle sessions"
            );
            self.publish_len();
        }
        removed
    }

    /// Remove `id` only if it is still idle at removal time; activity since the scan keeps it.
    fn expire_if_idle(&self, id: &SessionId, cutoff: OffsetDateTime) -> bool {
        let Some((_, tracker)) = self
            .trackers
            .remove_if(id, |_, tracker| tracker.last_activity() < cutoff)
        else {
            return false;
        };
        tracker.stop_tracking();
        debug!(target = "readtrail::registry", session_id = %id, "idle session expired");
        true
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    fn publish_len(&self) {
        gauge!("readtrail_registry_sessions").set(self.trackers.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use time::macros::datetime;

    use crate::application::repos::RepoError;
    use crate::application::tracker::{ManualClock, TrackerPhase};
    use crate::domain::pages::{EngagementUpdate, PageImpression};
    use crate::domain::sessions::VisitorSession;

    struct NullStore;

    #[async_trait]
    impl TrackingStore for NullStore {
        async fn insert_session(&self, _session: &VisitorSession) -> Result<(), RepoError> {
            Ok(())
        }

        async fn insert_impression(&self, _impression: &PageImpression) -> Result<(), RepoError> {
            Ok(())
        }

        async fn upsert_engagement(&self, _update: &EngagementUpdate) -> Result<(), RepoError> {
            Ok(())
        }

        async fn health_check(&self) -> Result<(), RepoError> {
            Ok(())
        }
    }

    fn registry(clock: Arc<ManualClock>) -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(NullStore),
            TrackingConfig::default(),
            clock,
            Duration::minutes(30),
        )
    }

    #[tokio::test]
    async fn open_sessions_are_independent() {
        let clock = Arc::new(ManualClock::new(datetime!(2026-05-04 09:00:00 UTC)));
        let registry = registry(clock);

        let (first, _) = registry.open(ClientInfo::default());
        let (second, _) = registry.open(ClientInfo::default());
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get(&first).expect("first tracker").session_id(),
            first
        );
    }

    #[tokio::test]
    async fn close_stops_tracker() {
        let clock = Arc::new(ManualClock::new(datetime!(2026-05-04 09:00:00 UTC)));
        let registry = registry(clock);
        let (id, tracker) = registry.open(ClientInfo::default());

        assert!(registry.close(&id));
        assert!(!registry.close(&id));
        assert_eq!(tracker.phase(), TrackerPhase::Stopped);
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test]
    async fn sweep_only_removes_idle_trackers() {
        let clock = Arc::new(ManualClock::new(datetime!(2026-05-04 09:00:00 UTC)));
        let registry = registry(clock.clone());
        let (stale, stale_tracker) = registry.open(ClientInfo::default());

        clock.advance(Duration::minutes(20));
        let (fresh, fresh_tracker) = registry.open(ClientInfo::default());
        fresh_tracker.track_page_view("home");

        clock.advance(Duration::minutes(15));
        assert_eq!(registry.sweep_idle(), 1);
        assert!(registry.get(&stale).is_none());
        assert!(registry.get(&fresh).is_some());
        assert_eq!(stale_tracker.phase(), TrackerPhase::Stopped);
        assert_eq!(registry.sweep_idle(), 0);
    }

    #[tokio::test]
    async fn activity_after_the_scan_keeps_tracker_alive() {
        let clock = Arc::new(ManualClock::new(datetime!(2026-05-04 09:00:00 UTC)));
        let registry = registry(clock.clone());
        let (id, tracker) = registry.open(ClientInfo::default());

        clock.advance(Duration::minutes(45));
        let cutoff = clock.now() - registry.idle_timeout();
        tracker.track_page_view("home");

        assert!(!registry.expire_if_idle(&id, cutoff));
        assert!(registry.get(&id).is_some());
        assert_eq!(tracker.phase(), TrackerPhase::Active);

        clock.advance(Duration::minutes(45));
        let cutoff = clock.now() - registry.idle_timeout();
        assert!(registry.expire_if_idle(&id, cutoff));
        assert_eq!(tracker.phase(), TrackerPhase::Stopped);
    }
}
