//! Query Services: paged, ordered listings for cases, evidence, jobs, and
//! audit rows (`spec.md §2` last component row: "paged, ordered listings").
//! Every listing here is a plain read against the pool — none of it goes
//! through the write gate.

use sqlx::{Row, SqlitePool};

use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::CaseId;
use casegraph_types::model::{AuditEvent, EvidenceItem, Job};

/// Requested page of a listing: `offset` rows skipped, at most `limit`
/// returned. `limit` is clamped to `[1, 500]` so a careless caller cannot
/// force one query to materialize the entire table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Build a request, clamping `limit` into `[1, MAX_PAGE_LIMIT]`.
    pub fn new(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 50)
    }
}

/// Upper bound on [`PageRequest::limit`].
const MAX_PAGE_LIMIT: u32 = 500;

/// One page of results plus whether more rows exist beyond it.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    fn from_overfetch(mut items: Vec<T>, limit: u32) -> Self {
        let has_more = items.len() as u32 > limit;
        if has_more {
            items.truncate(limit as usize);
        }
        Page { items, has_more }
    }
}

/// Cases ordered by `createdAtUtc` ascending — the order a case list view
/// would show new cases appended to the bottom.
pub async fn list_cases(pool: &SqlitePool, page: PageRequest) -> Result<Page<crate::CaseSummary>, CaseGraphError> {
    let rows = sqlx::query(
        r#"SELECT c."CaseId", c."Name", c."CreatedAtUtc", c."LastOpenedAtUtc",
                  (SELECT COUNT(*) FROM "EvidenceItemRecord" e WHERE e."CaseId" = c."CaseId") AS "EvidenceCount"
           FROM "CaseRecord" c
           ORDER BY c."CreatedAtUtc" ASC
           LIMIT ? OFFSET ?"#,
    )
    .bind(page.limit + 1)
    .bind(page.offset)
    .fetch_all(pool)
    .await
    .map_err(|e| CaseGraphError::Unknown(e.into()))?;

    let summaries = rows
        .iter()
        .map(|row| {
            Ok(crate::CaseSummary {
                case: crate::case::row_to_case(row)?,
                evidence_count: row.try_get::<i64, _>("EvidenceCount").map_err(|e| CaseGraphError::Unknown(e.into()))? as u32,
            })
        })
        .collect::<Result<Vec<_>, CaseGraphError>>()?;

    Ok(Page::from_overfetch(summaries, page.limit))
}

/// One case's evidence items, ordered by `addedAtUtc` ascending (import
/// order).
pub async fn list_evidence(pool: &SqlitePool, case_id: CaseId, page: PageRequest) -> Result<Page<EvidenceItem>, CaseGraphError> {
    let rows = sqlx::query(
        r#"SELECT "EvidenceItemId", "CaseId", "DisplayName", "OriginalPath", "OriginalFileName",
                  "AddedAtUtc", "SizeBytes", "Sha256Hex", "FileExtension", "SourceType",
                  "ManifestRelativePath", "StoredRelativePath"
           FROM "EvidenceItemRecord"
           WHERE "CaseId" = ?
           ORDER BY "AddedAtUtc" ASC
           LIMIT ? OFFSET ?"#,
    )
    .bind(case_id.to_string())
    .bind(page.limit + 1)
    .bind(page.offset)
    .fetch_all(pool)
    .await
    .map_err(|e| CaseGraphError::Unknown(e.into()))?;

    let items = rows.iter().map(row_to_evidence_item).collect::<Result<Vec<_>, CaseGraphError>>()?;
    Ok(Page::from_overfetch(items, page.limit))
}

/// Jobs scoped to one case, newest first — the order a job tray view would
/// show the most recently queued job at the top.
pub async fn list_jobs_for_case(pool: &SqlitePool, case_id: CaseId, page: PageRequest) -> Result<Page<Job>, CaseGraphError> {
    let rows = sqlx::query(
        r#"SELECT "JobId", "CreatedAtUtc", "StartedAtUtc", "CompletedAtUtc", "Status", "JobType",
                  "CaseId", "EvidenceItemId", "Progress", "StatusMessage", "ErrorMessage", "JsonPayload",
                  "CorrelationId", "Operator"
           FROM "JobRecord"
           WHERE "CaseId" = ?
           ORDER BY "CreatedAtUtc" DESC
           LIMIT ? OFFSET ?"#,
    )
    .bind(case_id.to_string())
    .bind(page.limit + 1)
    .bind(page.offset)
    .fetch_all(pool)
    .await
    .map_err(|e| CaseGraphError::Unknown(e.into()))?;

    let jobs = rows.iter().map(row_to_job).collect::<Result<Vec<_>, CaseGraphError>>()?;
    Ok(Page::from_overfetch(jobs, page.limit))
}

/// Audit rows scoped to one case, newest first. [`casegraph_store::AuditLog::recent_for_case`]
/// covers the common "most recent N" case for a tail view's initial page;
/// this adds the `offset` a "load older" control needs.
pub async fn list_audit_for_case(pool: &SqlitePool, case_id: CaseId, page: PageRequest) -> Result<Page<AuditEvent>, CaseGraphError> {
    let rows = sqlx::query(
        r#"SELECT "AuditEventId", "TimestampUtc", "Operator", "ActionType", "CaseId", "EvidenceItemId", "Summary", "JsonPayload"
           FROM "AuditEventRecord"
           WHERE "CaseId" = ?
           ORDER BY "TimestampUtc" DESC
           LIMIT ? OFFSET ?"#,
    )
    .bind(case_id.to_string())
    .bind(page.limit + 1)
    .bind(page.offset)
    .fetch_all(pool)
    .await
    .map_err(|e| CaseGraphError::Unknown(e.into()))?;

    let events = rows.iter().map(row_to_audit_event).collect::<Result<Vec<_>, CaseGraphError>>()?;
    Ok(Page::from_overfetch(events, page.limit))
}

fn row_to_evidence_item(row: &sqlx::sqlite::SqliteRow) -> Result<EvidenceItem, CaseGraphError> {
    let evidence_item_id: String = row.try_get("EvidenceItemId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let case_id: String = row.try_get("CaseId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let added_at_utc: String = row.try_get("AddedAtUtc").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let size_bytes: i64 = row.try_get("SizeBytes").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let source_type: String = row.try_get("SourceType").map_err(|e| CaseGraphError::Unknown(e.into()))?;

    Ok(EvidenceItem {
        evidence_item_id: parse_uuid(&evidence_item_id)?,
        case_id: parse_uuid(&case_id)?,
        display_name: row.try_get("DisplayName").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        original_path: row.try_get("OriginalPath").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        original_file_name: row.try_get("OriginalFileName").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        added_at_utc: parse_timestamp(&added_at_utc)?,
        size_bytes: size_bytes as u64,
        sha256_hex: row.try_get("Sha256Hex").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        file_extension: row.try_get("FileExtension").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        source_type: source_type.parse()?,
        manifest_relative_path: row.try_get("ManifestRelativePath").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        stored_relative_path: row.try_get("StoredRelativePath").map_err(|e| CaseGraphError::Unknown(e.into()))?,
    })
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, CaseGraphError> {
    let job_id: String = row.try_get("JobId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let created_at_utc: String = row.try_get("CreatedAtUtc").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let started_at_utc: Option<String> = row.try_get("StartedAtUtc").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let completed_at_utc: Option<String> = row.try_get("CompletedAtUtc").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let status: String = row.try_get("Status").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let case_id: Option<String> = row.try_get("CaseId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let evidence_item_id: Option<String> = row.try_get("EvidenceItemId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let json_payload: String = row.try_get("JsonPayload").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let correlation_id: String = row.try_get("CorrelationId").map_err(|e| CaseGraphError::Unknown(e.into()))?;

    Ok(Job {
        job_id: parse_uuid(&job_id)?,
        created_at_utc: parse_timestamp(&created_at_utc)?,
        started_at_utc: started_at_utc.map(|s| parse_timestamp(&s)).transpose()?,
        completed_at_utc: completed_at_utc.map(|s| parse_timestamp(&s)).transpose()?,
        status: status.parse()?,
        job_type: row.try_get("JobType").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        case_id: case_id.map(|s| parse_uuid(&s)).transpose()?,
        evidence_item_id: evidence_item_id.map(|s| parse_uuid(&s)).transpose()?,
        progress: row.try_get("Progress").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        status_message: row.try_get("StatusMessage").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        error_message: row.try_get("ErrorMessage").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        json_payload: serde_json::from_str(&json_payload).map_err(|e| CaseGraphError::Unknown(e.into()))?,
        correlation_id: parse_uuid(&correlation_id)?,
        operator: row.try_get("Operator").map_err(|e| CaseGraphError::Unknown(e.into()))?,
    })
}

fn row_to_audit_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, CaseGraphError> {
    let audit_event_id: String = row.try_get("AuditEventId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let timestamp_utc: String = row.try_get("TimestampUtc").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let case_id: Option<String> = row.try_get("CaseId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let evidence_item_id: Option<String> = row.try_get("EvidenceItemId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let json_payload: String = row.try_get("JsonPayload").map_err(|e| CaseGraphError::Unknown(e.into()))?;

    Ok(AuditEvent {
        audit_event_id: parse_uuid(&audit_event_id)?,
        timestamp_utc: parse_timestamp(&timestamp_utc)?,
        operator: row.try_get("Operator").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        action_type: row.try_get("ActionType").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        case_id: case_id.map(|s| parse_uuid(&s)).transpose()?,
        evidence_item_id: evidence_item_id.map(|s| parse_uuid(&s)).transpose()?,
        summary: row.try_get("Summary").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        json_payload: serde_json::from_str(&json_payload).map_err(|e| CaseGraphError::Unknown(e.into()))?,
    })
}

fn parse_uuid(s: &str) -> Result<uuid::Uuid, CaseGraphError> {
    uuid::Uuid::parse_str(s).map_err(|e| CaseGraphError::Unknown(e.into()))
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>, CaseGraphError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| CaseGraphError::Unknown(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::case::create_case;
    use crate::Workspace;

    #[tokio::test]
    async fn list_cases_pages_and_flags_has_more() {
        let dir = tempdir().unwrap();
        let paths = casegraph_clock::WorkspacePaths::at(dir.path());
        let workspace = Workspace::open(paths).await.unwrap();

        for i in 0..3 {
            create_case(&workspace, &format!("Case {i}"), "tester").await.unwrap();
        }

        let page = list_cases(workspace.pool(), PageRequest::new(0, 2)).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);

        let page = list_cases(workspace.pool(), PageRequest::new(2, 2)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn list_evidence_for_case_is_empty_when_no_imports_happened() {
        let dir = tempdir().unwrap();
        let paths = casegraph_clock::WorkspacePaths::at(dir.path());
        let workspace = Workspace::open(paths).await.unwrap();
        let case = create_case(&workspace, "Op Redwood", "tester").await.unwrap();

        let page = list_evidence(workspace.pool(), case.case_id, PageRequest::default()).await.unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn page_request_clamps_limit() {
        let request = PageRequest::new(0, 10_000);
        assert_eq!(request.limit, MAX_PAGE_LIMIT);
        let request = PageRequest::new(0, 0);
        assert_eq!(request.limit, 1);
    }
}
