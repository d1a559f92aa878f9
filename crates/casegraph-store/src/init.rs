//! Workspace initializer: directory bootstrap, schema inspection, and the
//! quarantine-and-rebuild repair path (`spec.md §4.1`).
//!
//! `case.json` snapshots and evidence `manifest.json` files are the
//! authoritative record of a case's identity and vault contents; the SQL
//! database is a derived, rebuildable index over them plus whatever has been
//! ingested since. A corrupt or foreign `workspace.db` is therefore always
//! safe to quarantine and reconstruct from disk — anything the rebuild
//! cannot recover (message/target/presence rows) is restored by re-running
//! the relevant jobs, which is why the rebuilder leaves the evidence items
//! `Unverified`-equivalent until a caller re-triggers ingest.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::fs;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use casegraph_clock::{Clock, WorkspacePaths};
use casegraph_types::error::CaseGraphError;
use casegraph_types::model::AuditEvent;

use crate::audit::AuditLog;
use crate::schema;
use crate::snapshot;

/// Busy timeout applied to every connection, in addition to the write
/// gate's own retry policy; this absorbs brief contention from readers
/// sharing the pool without involving the gate at all.
const SQLITE_BUSY_TIMEOUT_MS: u32 = 5_000;

/// Outcome of [`initialize`], reported to the caller for logging/audit
/// purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// No `workspace.db` existed; a fresh one was created and migrated.
    Created,
    /// `workspace.db` existed and had `SchemaMigrationHistory`; migrated in
    /// place.
    MigratedInPlace,
    /// `workspace.db` existed but was foreign or missing required tables;
    /// it was quarantined and a fresh database rebuilt from `case.json` and
    /// `manifest.json` files on disk.
    RepairedByRebuild { quarantined_path: String },
}

/// Open (creating and/or repairing as needed) the workspace database at
/// `paths.db_path()`, returning a ready-to-use pool and the audit log
/// publisher the rest of the store shares.
#[instrument(skip(clock), fields(root = %paths.root().display()))]
pub async fn initialize(
    paths: &WorkspacePaths,
    clock: &dyn Clock,
) -> Result<(SqlitePool, AuditLog, InitOutcome), CaseGraphError> {
    fs::create_dir_all(paths.root())
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?;
    fs::create_dir_all(paths.cases_root())
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?;

    let db_path = paths.db_path();
    let db_existed = db_path.exists();

    let (pool, outcome) = if !db_existed {
        let pool = open_pool(&db_path).await?;
        schema::migrate(&pool)
            .await
            .map_err(|e| CaseGraphError::Unknown(e.into()))?;
        (pool, InitOutcome::Created)
    } else {
        let pool = open_pool(&db_path).await?;
        // A file that is not a SQLite database at all (foreign format,
        // truncated, garbage) fails every query, not just "table missing";
        // treat any inspection error the same as "no migration history" so
        // it falls into the repair path below instead of propagating.
        let has_history = schema::has_migration_history(&pool).await.unwrap_or(false);

        if has_history {
            schema::migrate(&pool)
                .await
                .map_err(|e| CaseGraphError::Unknown(e.into()))?;
            (pool, InitOutcome::MigratedInPlace)
        } else {
            pool.close().await;
            let quarantined = quarantine(paths, &db_path, clock).await?;
            let fresh_pool = open_pool(&db_path).await?;
            schema::migrate(&fresh_pool)
                .await
                .map_err(|e| CaseGraphError::Unknown(e.into()))?;
            rebuild_from_disk(&fresh_pool, paths, clock).await?;
            (
                fresh_pool,
                InitOutcome::RepairedByRebuild {
                    quarantined_path: quarantined,
                },
            )
        }
    };

    if !schema::has_all_required_tables(&pool)
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?
    {
        let correlation_id = Uuid::new_v4();
        return Err(CaseGraphError::InvalidWorkspaceState { correlation_id });
    }

    let audit_log = AuditLog::new();
    if let InitOutcome::RepairedByRebuild { quarantined_path } = &outcome {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| CaseGraphError::Unknown(e.into()))?;
        audit_log
            .append(
                &mut tx,
                AuditEvent {
                    audit_event_id: Uuid::new_v4(),
                    timestamp_utc: clock.now_utc(),
                    operator: "system".to_string(),
                    action_type: "WorkspaceDbRebuilt".to_string(),
                    case_id: None,
                    evidence_item_id: None,
                    summary: format!("workspace database rebuilt; prior file quarantined at {quarantined_path}"),
                    json_payload: serde_json::json!({ "quarantinedPath": quarantined_path }),
                },
            )
            .await
            .map_err(|e| CaseGraphError::Unknown(e.into()))?;
        tx.commit().await.map_err(|e| CaseGraphError::Unknown(e.into()))?;
    }

    abandon_stale_running_jobs(&pool, &audit_log, clock).await?;

    Ok((pool, audit_log, outcome))
}

async fn open_pool(db_path: &Path) -> Result<SqlitePool, CaseGraphError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS as u64));

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))
}

async fn quarantine(
    paths: &WorkspacePaths,
    db_path: &Path,
    clock: &dyn Clock,
) -> Result<String, CaseGraphError> {
    let now = clock.now_utc();
    let mut disambiguator = None;
    loop {
        let candidate = paths.broken_db_path(now, disambiguator);
        if !candidate.exists() {
            fs::rename(db_path, &candidate)
                .await
                .map_err(|e| CaseGraphError::Unknown(e.into()))?;
            warn!(quarantined = %candidate.display(), "workspace database was foreign or pre-migration; quarantined for rebuild");
            return Ok(candidate.display().to_string());
        }
        disambiguator = Some(disambiguator.map_or(1, |n| n + 1));
    }
}

/// Reconstruct `CaseRecord` and `EvidenceItemRecord` rows from every
/// `cases/*/case.json` and `cases/*/vault/*/manifest.json` file found on
/// disk. Message/target/presence data is not recoverable this way; callers
/// are expected to re-run ingest jobs for evidence items afterward.
#[instrument(skip(pool, _clock))]
async fn rebuild_from_disk(
    pool: &SqlitePool,
    paths: &WorkspacePaths,
    _clock: &dyn Clock,
) -> Result<(), CaseGraphError> {
    let cases_root = paths.cases_root();
    let mut case_dirs = match fs::read_dir(&cases_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CaseGraphError::Unknown(e.into())),
    };

    let mut restored_cases = 0u32;
    let mut restored_evidence = 0u32;

    while let Some(entry) = case_dirs
        .next_entry()
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?
    {
        if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }

        let case_json_path = entry.path().join("case.json");
        let case = match snapshot::read_case_snapshot(&case_json_path).await? {
            Some(snapshot) => snapshot.case_info,
            None => continue,
        };

        sqlx::query(
            r#"INSERT OR REPLACE INTO "CaseRecord" ("CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc")
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(case.case_id.to_string())
        .bind(&case.name)
        .bind(case.created_at_utc.to_rfc3339())
        .bind(case.last_opened_at_utc.map(|t| t.to_rfc3339()))
        .execute(pool)
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?;
        restored_cases += 1;

        let vault_dir = paths.vault_dir(case.case_id);
        let mut evidence_dirs = match fs::read_dir(&vault_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(CaseGraphError::Unknown(e.into())),
        };

        while let Some(evidence_entry) = evidence_dirs
            .next_entry()
            .await
            .map_err(|e| CaseGraphError::Unknown(e.into()))?
        {
            if !evidence_entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let manifest_path = evidence_entry.path().join("manifest.json");
            let Some(item) = snapshot::read_manifest_as_snapshot(&manifest_path).await? else {
                continue;
            };

            sqlx::query(
                r#"INSERT OR REPLACE INTO "EvidenceItemRecord"
                   ("EvidenceItemId", "CaseId", "DisplayName", "OriginalPath", "OriginalFileName",
                    "AddedAtUtc", "SizeBytes", "Sha256Hex", "FileExtension", "SourceType",
                    "ManifestRelativePath", "StoredRelativePath")
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(item.evidence_item_id.to_string())
            .bind(item.case_id.to_string())
            .bind(&item.display_name)
            .bind(&item.original_path)
            .bind(&item.original_file_name)
            .bind(item.added_at_utc.to_rfc3339())
            .bind(item.size_bytes as i64)
            .bind(&item.sha256_hex)
            .bind(&item.file_extension)
            .bind(item.source_type.to_string())
            .bind(&item.manifest_relative_path)
            .bind(&item.stored_relative_path)
            .execute(pool)
            .await
            .map_err(|e| CaseGraphError::Unknown(e.into()))?;
            restored_evidence += 1;
        }
    }

    info!(restored_cases, restored_evidence, "rebuilt workspace database from disk snapshots");
    Ok(())
}

/// Mark every job left `Running` by a prior, now-dead process as
/// `Abandoned`, recording one audit row per job (`spec.md §4.4`).
#[instrument(skip(pool, audit_log, clock))]
async fn abandon_stale_running_jobs(
    pool: &SqlitePool,
    audit_log: &AuditLog,
    clock: &dyn Clock,
) -> Result<(), CaseGraphError> {
    let running_ids: Vec<String> = sqlx::query(r#"SELECT "JobId" FROM "JobRecord" WHERE "Status" = 'Running'"#)
        .fetch_all(pool)
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?
        .into_iter()
        .map(|row| row.try_get::<String, _>("JobId").expect("JobId column present"))
        .collect();

    if running_ids.is_empty() {
        return Ok(());
    }

    let now = clock.now_utc();
    let mut tx = pool.begin().await.map_err(|e| CaseGraphError::Unknown(e.into()))?;

    for job_id in &running_ids {
        sqlx::query(
            r#"UPDATE "JobRecord" SET "Status" = 'Abandoned', "CompletedAtUtc" = ?, "StatusMessage" = ?
               WHERE "JobId" = ?"#,
        )
        .bind(now.to_rfc3339())
        .bind("Abandoned: process restarted while job was running")
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?;

        audit_log
            .append(
                &mut tx,
                AuditEvent {
                    audit_event_id: Uuid::new_v4(),
                    timestamp_utc: now,
                    operator: "system".to_string(),
                    action_type: "JobAbandoned".to_string(),
                    case_id: None,
                    evidence_item_id: None,
                    summary: format!("job {job_id} abandoned: interrupted by restart"),
                    json_payload: serde_json::json!({ "jobId": job_id }),
                },
            )
            .await
            .map_err(|e| CaseGraphError::Unknown(e.into()))?;
    }

    tx.commit().await.map_err(|e| CaseGraphError::Unknown(e.into()))?;
    info!(count = running_ids.len(), "abandoned stale running jobs from prior process");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_clock::SystemClock;
    use tempfile::tempdir;

    #[tokio::test]
    async fn creates_fresh_database_when_absent() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let clock = SystemClock;

        let (pool, _audit, outcome) = initialize(&paths, &clock).await.unwrap();
        assert_eq!(outcome, InitOutcome::Created);
        assert!(schema::has_all_required_tables(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn migrates_in_place_on_second_open() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let clock = SystemClock;

        let (pool, _audit, _) = initialize(&paths, &clock).await.unwrap();
        pool.close().await;

        let (_pool2, _audit2, outcome) = initialize(&paths, &clock).await.unwrap();
        assert_eq!(outcome, InitOutcome::MigratedInPlace);
    }

    #[tokio::test]
    async fn repairs_foreign_database_by_rebuilding() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let clock = SystemClock;

        fs::create_dir_all(paths.root()).await.unwrap();
        fs::write(paths.db_path(), b"not a sqlite database").await.unwrap();

        let (pool, _audit, outcome) = initialize(&paths, &clock).await.unwrap();
        assert!(matches!(outcome, InitOutcome::RepairedByRebuild { .. }));
        assert!(schema::has_all_required_tables(&pool).await.unwrap());
    }
}
