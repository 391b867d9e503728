//! Visitor sessions: the identity that groups page views of one browsing visit.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::DomainError;

/// Opaque, randomly minted session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|err| DomainError::validation("session_id", err.to_string()))
    }
}

/// Coarse device class inferred from a user agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

impl DeviceKind {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.trim().to_ascii_lowercase();
        if ua.is_empty() {
            return DeviceKind::Unknown;
        }

        if ["bot", "crawler", "spider"]
            .iter()
            .any(|needle| ua.contains(needle))
        {
            DeviceKind::Bot
        } else if ua.contains("ipad") || ua.contains("tablet") {
            DeviceKind::Tablet
        } else if ["mobi", "iphone", "android"]
            .iter()
            .any(|needle| ua.contains(needle))
        {
            DeviceKind::Mobile
        } else {
            DeviceKind::Desktop
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Desktop => "desktop",
            DeviceKind::Mobile => "mobile",
            DeviceKind::Tablet => "tablet",
            DeviceKind::Bot => "bot",
            DeviceKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Browser-side metadata captured when a session is minted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

impl ClientInfo {
    pub fn new(user_agent: Option<String>, referrer: Option<String>) -> Self {
        Self {
            user_agent: non_blank(user_agent),
            referrer: non_blank(referrer),
        }
    }

    pub fn device_kind(&self) -> DeviceKind {
        self.user_agent
            .as_deref()
            .map(DeviceKind::from_user_agent)
            .unwrap_or(DeviceKind::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitorSession {
    pub id: SessionId,
    pub user_agent: Option<String>,
    pub device_kind: DeviceKind,
    pub referrer: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl VisitorSession {
    pub fn start(id: SessionId, client: &ClientInfo, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            user_agent: client.user_agent.clone(),
            device_kind: client.device_kind(),
            referrer: client.referrer.clone(),
            created_at,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_device_kind_from_user_agent() {
        let cases = [
            ("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Firefox/128.0", DeviceKind::Desktop),
            ("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148", DeviceKind::Mobile),
            ("Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile Safari/537.36", DeviceKind::Mobile),
            ("Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X)", DeviceKind::Tablet),
            ("Googlebot/2.1 (+http://www.google.com/bot.html)", DeviceKind::Bot),
            ("   ", DeviceKind::Unknown),
        ];

        for (ua, expected) in cases {
            assert_eq!(DeviceKind::from_user_agent(ua), expected, "user agent `{ua}`");
        }
    }

    #[test]
    fn client_info_drops_blank_fields() {
        let client = ClientInfo::new(Some("  ".into()), Some(" https://example.com/ ".into()));
        assert_eq!(client.user_agent, None);
        assert_eq!(client.referrer.as_deref(), Some("https://example.com/"));
        assert_eq!(client.device_kind(), DeviceKind::Unknown);
    }

    #[test]
    fn session_id_rejects_garbage() {
        let err = "not-a-session".parse::<SessionId>().expect_err("invalid id");
        assert!(matches!(err, DomainError::Validation { field: "session_id", .. }));

        let id = SessionId::new_random();
        assert_eq!(id.to_string().parse::<SessionId>(), Ok(id));
    }
}
