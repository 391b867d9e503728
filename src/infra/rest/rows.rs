use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::sessions::VisitorSession;

#[derive(Debug, Serialize)]
pub(super) struct SessionRow<'a> {
    id: Uuid,
    user_agent: Option<&'a str>,
    device_kind: &'static str,
    referrer: Option<&'a str>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl<'a> From<&'a VisitorSession> for SessionRow<'a> {
    fn from(session: &'a VisitorSession) -> Self {
        Self {
            id: session.id.as_uuid(),
            user_agent: session.user_agent.as_deref(),
            device_kind: session.device_kind.as_str(),
            referrer: session.referrer.as_deref(),
            created_at: session.created_at,
        }
    }
}
