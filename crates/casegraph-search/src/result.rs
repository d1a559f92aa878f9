//! `SearchHit` — one ranked/ordered row returned by `Search(request)`.

use chrono::{DateTime, Utc};

use casegraph_types::ids::{CaseId, EvidenceItemId, MessageEventId, ThreadId};
use casegraph_types::model::{Direction, Platform};

/// The maximum length (in chars) of a LIKE-path/keywordless snippet
/// (`spec.md §4.8`, "truncated 280-char snippet").
pub const LIKE_SNIPPET_MAX_CHARS: usize = 280;

/// One matching message, with an excerpt suitable for direct display.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub message_event_id: MessageEventId,
    pub thread_id: ThreadId,
    pub case_id: CaseId,
    pub evidence_item_id: EvidenceItemId,
    pub platform: Platform,
    pub timestamp_utc: Option<DateTime<Utc>>,
    pub direction: Direction,
    pub sender: Option<String>,
    pub recipients: Option<String>,
    pub is_deleted: bool,
    pub source_locator: String,
    pub snippet: String,
}

/// Truncate `body` to [`LIKE_SNIPPET_MAX_CHARS`] on a char boundary,
/// appending an ellipsis when truncated.
pub(crate) fn truncated_snippet(body: Option<&str>) -> String {
    let body = body.unwrap_or_default();
    if body.chars().count() <= LIKE_SNIPPET_MAX_CHARS {
        return body.to_string();
    }
    let truncated: String = body.chars().take(LIKE_SNIPPET_MAX_CHARS).collect();
    format!("{truncated}...")
}
