//! `SearchRequest` and `PrepareRequest` (`spec.md §4.8`).

use chrono::{DateTime, Utc};

use casegraph_types::ids::{CaseId, TargetId};
use casegraph_types::model::{Direction, IdentifierType};

/// Caller-facing search request. Structured filters are additive (AND).
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: Option<String>,
    /// `None`/`"All"` means no platform filter; otherwise matched
    /// case-insensitively against `MessageEventRecord.Platform`.
    pub platform_filter: Option<String>,
    pub date_from_utc: Option<DateTime<Utc>>,
    pub date_to_utc: Option<DateTime<Utc>>,
    pub direction_filter: Option<Direction>,
    /// Restrict hits to messages where this target has a presence link.
    pub target_id_filter: Option<TargetId>,
    /// Only meaningful together with `target_id_filter`.
    pub identifier_type_filter: Option<IdentifierType>,
    pub take: i64,
    pub skip: i64,
}

/// A [`SearchRequest`] after `PrepareRequest` normalization
/// (`spec.md §4.8`).
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    pub case_id: CaseId,
    pub query: Option<String>,
    pub platform: Option<String>,
    pub date_from_utc: Option<DateTime<Utc>>,
    pub date_to_utc: Option<DateTime<Utc>>,
    pub direction: Option<Direction>,
    pub target_id_filter: Option<TargetId>,
    pub identifier_type_filter: Option<IdentifierType>,
    pub take: i64,
    pub skip: i64,
    pub max_rows: i64,
}

pub(crate) fn prepare(case_id: CaseId, request: &SearchRequest) -> PreparedRequest {
    let take = request.take.clamp(1, 200);
    let skip = request.skip.max(0);
    let max_rows = (take + skip + 500).clamp(50, 2000);

    let platform = request.platform_filter.as_deref().and_then(|p| {
        let trimmed = p.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            None
        } else {
            Some(trimmed.to_ascii_lowercase())
        }
    });

    let query = request.query.as_deref().map(str::trim).filter(|q| !q.is_empty()).map(str::to_string);

    let (date_from_utc, date_to_utc) = match (request.date_from_utc, request.date_to_utc) {
        (Some(from), Some(to)) if from > to => (Some(to), Some(from)),
        other => other,
    };

    PreparedRequest {
        case_id,
        query,
        platform,
        date_from_utc,
        date_to_utc,
        direction: request.direction_filter,
        target_id_filter: request.target_id_filter,
        identifier_type_filter: request.identifier_type_filter,
        take,
        skip,
        max_rows,
    }
}

impl PreparedRequest {
    /// `Search(request)` returns empty without touching the database when
    /// both the keyword query and every structured filter are empty
    /// (`spec.md §4.8`, "PrepareRequest").
    pub(crate) fn is_empty_request(&self) -> bool {
        self.query.is_none()
            && self.platform.is_none()
            && self.date_from_utc.is_none()
            && self.date_to_utc.is_none()
            && self.direction.is_none()
            && self.target_id_filter.is_none()
    }
}
