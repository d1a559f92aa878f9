//! `WorkspaceHealth`: a read-only status snapshot for an external shell's
//! status bar (`SPEC_FULL.md` §C.3), grounded on the teacher's
//! `SqliteBackend::event_count`/`payload_count` instrumentation helpers.

use sqlx::SqlitePool;

use casegraph_store::InitOutcome;
use casegraph_types::error::CaseGraphError;

/// Point-in-time counts an external shell can poll without subscribing to
/// the job/audit live feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceHealth {
    pub case_count: u64,
    pub evidence_item_count: u64,
    pub queued_job_count: u64,
    pub running_job_count: u64,
    /// `true` if this workspace was opened by repairing/rebuilding from
    /// on-disk `case.json`/`manifest.json` snapshots rather than a clean
    /// open (`spec.md §4.1`).
    pub was_repaired_on_open: bool,
}

/// Snapshot current counts. Each count is its own query rather than one
/// join, since the tables involved are unrelated and an approximate,
/// momentarily-inconsistent snapshot is acceptable for a status display.
pub async fn snapshot(pool: &SqlitePool, init_outcome: &InitOutcome) -> Result<WorkspaceHealth, CaseGraphError> {
    let case_count = count(pool, r#"SELECT COUNT(*) FROM "CaseRecord""#).await?;
    let evidence_item_count = count(pool, r#"SELECT COUNT(*) FROM "EvidenceItemRecord""#).await?;
    let queued_job_count = count(pool, r#"SELECT COUNT(*) FROM "JobRecord" WHERE "Status" = 'Queued'"#).await?;
    let running_job_count = count(pool, r#"SELECT COUNT(*) FROM "JobRecord" WHERE "Status" = 'Running'"#).await?;

    Ok(WorkspaceHealth {
        case_count,
        evidence_item_count,
        queued_job_count,
        running_job_count,
        was_repaired_on_open: matches!(init_outcome, InitOutcome::RepairedByRebuild { .. }),
    })
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<u64, CaseGraphError> {
    let value: i64 = sqlx::query_scalar(sql)
        .fetch_one(pool)
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?;
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::case::create_case;
    use crate::Workspace;

    #[tokio::test]
    async fn snapshot_reflects_created_case_and_empty_queue() {
        let dir = tempdir().unwrap();
        let paths = casegraph_clock::WorkspacePaths::at(dir.path());
        let workspace = Workspace::open(paths).await.unwrap();

        create_case(&workspace, "Op Redwood", "tester").await.unwrap();

        let health = snapshot(workspace.pool(), workspace.init_outcome()).await.unwrap();
        assert_eq!(health.case_count, 1);
        assert_eq!(health.evidence_item_count, 0);
        assert_eq!(health.queued_job_count, 0);
        assert_eq!(health.running_job_count, 0);
        assert!(!health.was_repaired_on_open);
    }
}
