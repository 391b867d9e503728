//! Background worker that drains a tracker's write queue in issue order.

use std::{fmt, sync::Arc};

use metrics::counter;
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, warn};

use crate::application::repos::{RepoError, TrackingStore};
use crate::domain::pages::{EngagementUpdate, PageImpression, PageRef};
use crate::domain::sessions::{SessionId, VisitorSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Session,
    Impression,
    Engagement,
}

impl WriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteKind::Session => "session",
            WriteKind::Impression => "impression",
            WriteKind::Engagement => "engagement",
        }
    }
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub(super) enum TrackingWrite {
    Session(VisitorSession),
    Impression(PageImpression),
    Engagement(EngagementUpdate),
}

impl TrackingWrite {
    fn kind(&self) -> WriteKind {
        match self {
            TrackingWrite::Session(_) => WriteKind::Session,
            TrackingWrite::Impression(_) => WriteKind::Impression,
            TrackingWrite::Engagement(_) => WriteKind::Engagement,
        }
    }

    fn session_id(&self) -> SessionId {
        match self {
            TrackingWrite::Session(session) => session.id,
            TrackingWrite::Impression(impression) => impression.session_id,
            TrackingWrite::Engagement(update) => update.session_id,
        }
    }

    fn page_ref(&self) -> Option<PageRef> {
        match self {
            TrackingWrite::Session(_) => None,
            TrackingWrite::Impression(impression) => Some(impression.page_ref.clone()),
            TrackingWrite::Engagement(update) => Some(update.page_ref.clone()),
        }
    }

    async fn apply(&self, store: &dyn TrackingStore) -> Result<(), RepoError> {
        match self {
            TrackingWrite::Session(session) => store.insert_session(session).await,
            TrackingWrite::Impression(impression) => store.insert_impression(impression).await,
            TrackingWrite::Engagement(update) => store.upsert_engagement(update).await,
        }
    }
}

/// Result of one attempted remote write, published to an optional observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub kind: WriteKind,
    pub session_id: SessionId,
    pub page_ref: Option<PageRef>,
    pub error: Option<String>,
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub type OutcomeSender = mpsc::UnboundedSender<WriteOutcome>;

/// Sending half of a running writer. Dropping it lets the worker finish queued writes and exit.
#[derive(Debug)]
pub(super) struct WriteQueue {
    tx: mpsc::UnboundedSender<TrackingWrite>,
}

impl WriteQueue {
    /// Start a worker on the current Tokio runtime. Returns `None` outside a runtime.
    pub(super) fn spawn(
        store: Arc<dyn TrackingStore>,
        observer: Option<OutcomeSender>,
    ) -> Option<Self> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                warn!(
                    target = "readtrail::tracker",
                    error = %err,
                    "no async runtime available; tracking writes disabled"
                );
                return None;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(run_writer(store, rx, observer));
        Some(Self { tx })
    }

    pub(super) fn push(&self, write: TrackingWrite) {
        let kind = write.kind();
        if self.tx.send(write).is_err() {
            warn!(
                target = "readtrail::tracker",
                kind = %kind,
                "tracking writer has exited; dropping write"
            );
        }
    }
}

async fn run_writer(
    store: Arc<dyn TrackingStore>,
    mut rx: mpsc::UnboundedReceiver<TrackingWrite>,
    observer: Option<OutcomeSender>,
) {
    while let Some(write) = rx.recv().await {
        let kind = write.kind();
        let session_id = write.session_id();
        let result = write.apply(store.as_ref()).await;

        let outcome = match &result {
            Ok(()) => {
                debug!(
                    target = "readtrail::tracker",
                    kind = %kind,
                    session_id = %session_id,
                    "tracking write stored"
                );
                "ok"
            }
            Err(err) => {
                warn!(
                    target = "readtrail::tracker",
                    kind = %kind,
                    session_id = %session_id,
                    error = %err,
                    "tracking write failed; dropping"
                );
                "error"
            }
        };
        counter!(
            "readtrail_tracking_writes_total",
            "kind" => kind.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        if let Some(observer) = observer.as_ref() {
            // Observers are optional; a closed one is ignored.
            let _ = observer.send(WriteOutcome {
                kind,
                session_id,
                page_ref: write.page_ref(),
                error: result.err().map(|err| err.to_string()),
            });
        }
    }
}
