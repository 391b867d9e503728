//! Page references and the two records a tracked page produces.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use super::{error::DomainError, sessions::SessionId};

const MAX_PAGE_REF_LEN: usize = 512;

/// Page ref recorded for a literal that failed validation; slugs and post ids never contain parentheses.
pub const UNRESOLVED_PAGE: &str = "(unresolved)";

/// Reference to a tracked page: a post id, a slug or a generic page name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageRef(String);

impl PageRef {
    pub fn parse(value: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("page", "page reference must not be empty"));
        }
        if trimmed.len() > MAX_PAGE_REF_LEN {
            return Err(DomainError::validation(
                "page",
                format!("page reference exceeds {MAX_PAGE_REF_LEN} bytes"),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for PageRef {
    fn from(post_id: i64) -> Self {
        Self(post_id.to_string())
    }
}

impl From<&str> for PageRef {
    /// For compile-time page names such as `"home"`. Untrusted input goes through
    /// [`PageRef::parse`]; a literal that fails validation maps to [`UNRESOLVED_PAGE`].
    fn from(value: &str) -> Self {
        Self::parse(value).unwrap_or_else(|err| {
            warn!(
                target = "readtrail::domain",
                error = %err,
                "page literal failed validation; recording as unresolved"
            );
            Self(UNRESOLVED_PAGE.to_string())
        })
    }
}

impl TryFrom<String> for PageRef {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PageRef> for String {
    fn from(value: PageRef) -> Self {
        value.0
    }
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One recorded view of one page by one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageImpression {
    pub id: Uuid,
    pub session_id: SessionId,
    pub page_ref: PageRef,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Dwell measurement for a (session, page) pair. Later updates replace earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngagementUpdate {
    pub session_id: SessionId,
    pub page_ref: PageRef,
    pub duration_ms: i64,
    pub scroll_depth: Option<i16>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Clamp a reported scroll position into a whole percentage.
pub fn clamp_scroll_depth(percent: f64) -> i16 {
    if percent.is_nan() {
        return 0;
    }
    percent.round().clamp(0.0, 100.0) as i16
}

/// Milliseconds between two instants, never negative.
pub fn elapsed_ms(started_at: OffsetDateTime, ended_at: OffsetDateTime) -> i64 {
    let millis = (ended_at - started_at).whole_milliseconds();
    i64::try_from(millis.max(0)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn page_ref_trims_and_rejects_blank() {
        assert_eq!(PageRef::parse("  home ").expect("valid").as_str(), "home");
        assert!(PageRef::parse("   ").is_err());
        assert_eq!(PageRef::from(42_i64).as_str(), "42");
    }

    #[test]
    fn invalid_literal_is_kept_apart_from_real_pages() {
        let blank = PageRef::from("  ");
        assert_eq!(blank.as_str(), UNRESOLVED_PAGE);
        assert_ne!(blank, PageRef::from("unknown"));

        let oversize = "x".repeat(MAX_PAGE_REF_LEN + 1);
        assert_eq!(PageRef::from(oversize.as_str()).as_str(), UNRESOLVED_PAGE);
    }

    #[test]
    fn page_ref_deserializes_through_validation() {
        let parsed: PageRef = serde_json::from_str("\"about\"").expect("valid ref");
        assert_eq!(parsed, PageRef::from("about"));
        assert!(serde_json::from_str::<PageRef>("\"\"").is_err());
    }

    #[test]
    fn scroll_depth_is_clamped() {
        assert_eq!(clamp_scroll_depth(-3.0), 0);
        assert_eq!(clamp_scroll_depth(47.6), 48);
        assert_eq!(clamp_scroll_depth(180.0), 100);
        assert_eq!(clamp_scroll_depth(f64::NAN), 0);
    }

    #[test]
    fn elapsed_never_goes_negative() {
        let start = datetime!(2026-03-01 10:00:00 UTC);
        let end = datetime!(2026-03-01 10:00:05 UTC);
        assert_eq!(elapsed_ms(start, end), 5_000);
        assert_eq!(elapsed_ms(end, start), 0);
    }
}
