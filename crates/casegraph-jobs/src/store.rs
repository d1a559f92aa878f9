//! Direct `JobRecord`/`EvidenceItemRecord` persistence. The Job Queue owns
//! `JobRecord` outright; it also owns the one write `EvidenceImport`
//! performs against `EvidenceItemRecord`, since the filesystem side of
//! import (`casegraph-vault`) does not touch the database at all.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool, Transaction};
use uuid::Uuid;

use casegraph_store::AuditLog;
use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::{CaseId, CorrelationId, EvidenceItemId, JobId};
use casegraph_types::model::{AuditEvent, EvidenceItem, Job, JobStatus, SourceType};

/// Append one audit row inside `tx`. Every Job Queue mutation emits at
/// least one (`spec.md §4.4`: "Write one lifecycle audit per transition").
#[allow(clippy::too_many_arguments)]
pub(crate) async fn audit(
    tx: &mut Transaction<'_, sqlx::Sqlite>,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    operator: &str,
    action_type: &str,
    case_id: Option<CaseId>,
    summary: String,
    json_payload: Value,
) -> Result<(), sqlx::Error> {
    audit_log
        .append(
            tx,
            AuditEvent {
                audit_event_id: Uuid::new_v4(),
                timestamp_utc: now,
                operator: operator.to_string(),
                action_type: action_type.to_string(),
                case_id,
                evidence_item_id: None,
                summary,
                json_payload,
            },
        )
        .await
}

pub(crate) async fn insert_queued_job(tx: &mut Transaction<'_, sqlx::Sqlite>, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "JobRecord"
           ("JobId", "CreatedAtUtc", "StartedAtUtc", "CompletedAtUtc", "Status", "JobType",
            "CaseId", "EvidenceItemId", "Progress", "StatusMessage", "ErrorMessage", "JsonPayload",
            "CorrelationId", "Operator")
           VALUES (?, ?, NULL, NULL, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)"#,
    )
    .bind(job.job_id.to_string())
    .bind(job.created_at_utc.to_rfc3339())
    .bind(job.status.to_string())
    .bind(&job.job_type)
    .bind(job.case_id.map(|id| id.to_string()))
    .bind(job.evidence_item_id.map(|id| id.to_string()))
    .bind(job.progress)
    .bind(&job.status_message)
    .bind(job.json_payload.to_string())
    .bind(job.correlation_id.to_string())
    .bind(&job.operator)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// `Enqueue`'s `EvidenceVerify` dedup check: any `Queued`/`Running` job for
/// the same `(case_id, evidence_item_id)` (`spec.md §4.4`).
pub(crate) async fn find_dedup_candidate(
    pool: &SqlitePool,
    case_id: CaseId,
    evidence_item_id: EvidenceItemId,
) -> Result<Option<JobId>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT "JobId" FROM "JobRecord"
           WHERE "JobType" = 'EvidenceVerify' AND "CaseId" = ? AND "EvidenceItemId" = ?
             AND "Status" IN ('Queued', 'Running')
           ORDER BY "CreatedAtUtc" ASC
           LIMIT 1"#,
    )
    .bind(case_id.to_string())
    .bind(evidence_item_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| {
        let job_id: String = row.get("JobId");
        Uuid::parse_str(&job_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))
    })
    .transpose()
}

/// Every `Queued` job, oldest first, for the runner's startup priming pass.
pub(crate) async fn list_queued_ordered(pool: &SqlitePool) -> Result<Vec<JobId>, sqlx::Error> {
    let rows = sqlx::query(r#"SELECT "JobId" FROM "JobRecord" WHERE "Status" = 'Queued' ORDER BY "CreatedAtUtc" ASC"#)
        .fetch_all(pool)
        .await?;
    rows.into_iter()
        .map(|row| {
            let job_id: String = row.get("JobId");
            Uuid::parse_str(&job_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))
        })
        .collect()
}

/// Every `Running` job at startup: the previous process's in-flight work,
/// transitioned to `Abandoned` before the runner primes (`spec.md §4.4`,
/// "Running (from previous process) → Abandoned at startup").
pub async fn abandon_running_jobs(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE "JobRecord" SET "Status" = 'Abandoned', "CompletedAtUtc" = ?, "StatusMessage" = 'Abandoned at startup.'
           WHERE "Status" = 'Running'"#,
    )
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn load_job(pool: &SqlitePool, job_id: JobId) -> Result<Job, CaseGraphError> {
    let row = sqlx::query(
        r#"SELECT "JobId", "CreatedAtUtc", "StartedAtUtc", "CompletedAtUtc", "Status", "JobType",
                  "CaseId", "EvidenceItemId", "Progress", "StatusMessage", "ErrorMessage", "JsonPayload",
                  "CorrelationId", "Operator"
           FROM "JobRecord" WHERE "JobId" = ?"#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(|e| CaseGraphError::Unknown(e.into()))?
    .ok_or_else(|| CaseGraphError::JobNotFound(job_id))?;

    row_to_job(&row).map_err(|e| CaseGraphError::Unknown(e.into()))
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, sqlx::Error> {
    let job_id: String = row.try_get("JobId")?;
    let created_at_utc: String = row.try_get("CreatedAtUtc")?;
    let started_at_utc: Option<String> = row.try_get("StartedAtUtc")?;
    let completed_at_utc: Option<String> = row.try_get("CompletedAtUtc")?;
    let status: String = row.try_get("Status")?;
    let case_id: Option<String> = row.try_get("CaseId")?;
    let evidence_item_id: Option<String> = row.try_get("EvidenceItemId")?;
    let json_payload: String = row.try_get("JsonPayload")?;
    let correlation_id: String = row.try_get("CorrelationId")?;

    Ok(Job {
        job_id: parse_uuid(&job_id)?,
        created_at_utc: parse_timestamp(&created_at_utc)?,
        started_at_utc: started_at_utc.map(|t| parse_timestamp(&t)).transpose()?,
        completed_at_utc: completed_at_utc.map(|t| parse_timestamp(&t)).transpose()?,
        status: status.parse().map_err(|e: CaseGraphError| sqlx::Error::Decode(Box::new(e)))?,
        job_type: row.try_get("JobType")?,
        case_id: case_id.map(|s| parse_uuid(&s)).transpose()?,
        evidence_item_id: evidence_item_id.map(|s| parse_uuid(&s)).transpose()?,
        progress: row.try_get("Progress")?,
        status_message: row.try_get("StatusMessage")?,
        error_message: row.try_get("ErrorMessage")?,
        json_payload: serde_json::from_str::<Value>(&json_payload).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        correlation_id: parse_uuid(&correlation_id)?,
        operator: row.try_get("Operator")?,
    })
}

fn parse_uuid(value: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Atomically move `job_id` from `Queued` to `Running`, recording
/// `started_at_utc` if unset. Returns `false` (no-op) if the job was not
/// `Queued` any more (`spec.md §4.4`, "Execute").
pub(crate) async fn transition_to_running(tx: &mut Transaction<'_, sqlx::Sqlite>, job_id: JobId, now: DateTime<Utc>) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE "JobRecord" SET "Status" = 'Running', "StartedAtUtc" = COALESCE("StartedAtUtc", ?)
           WHERE "JobId" = ? AND "Status" = 'Queued'"#,
    )
    .bind(now.to_rfc3339())
    .bind(job_id.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Mark a `Queued` job `Canceled` directly (`spec.md §4.4`, cancellation
/// decision table row "Queued"). Returns `false` if it was not `Queued`.
pub(crate) async fn mark_canceled_if_queued(tx: &mut Transaction<'_, sqlx::Sqlite>, job_id: JobId, now: DateTime<Utc>) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE "JobRecord" SET "Status" = 'Canceled', "CompletedAtUtc" = ?, "Progress" = 1.0, "StatusMessage" = 'Canceled'
           WHERE "JobId" = ? AND "Status" = 'Queued'"#,
    )
    .bind(now.to_rfc3339())
    .bind(job_id.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn persist_progress(pool: &SqlitePool, job_id: JobId, progress: f64, status_message: &str) -> Result<(), sqlx::Error> {
    sqlx::query(r#"UPDATE "JobRecord" SET "Progress" = ?, "StatusMessage" = ? WHERE "JobId" = ?"#)
        .bind(progress)
        .bind(status_message)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Commit a terminal transition (`Succeeded`/`Failed`/`Canceled`), writing
/// one lifecycle audit row in the same transaction (`spec.md §4.4`, "Write
/// one lifecycle audit per transition").
#[allow(clippy::too_many_arguments)]
pub(crate) async fn finish_job(
    pool: &SqlitePool,
    audit_log: &AuditLog,
    job_id: JobId,
    case_id: Option<CaseId>,
    status: JobStatus,
    status_message: &str,
    error_message: Option<&str>,
    operator: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"UPDATE "JobRecord" SET "Status" = ?, "CompletedAtUtc" = ?, "Progress" = 1.0, "StatusMessage" = ?, "ErrorMessage" = ?
           WHERE "JobId" = ?"#,
    )
    .bind(status.to_string())
    .bind(now.to_rfc3339())
    .bind(status_message)
    .bind(error_message)
    .bind(job_id.to_string())
    .execute(&mut *tx)
    .await?;

    audit_log
        .append(
            &mut tx,
            AuditEvent {
                audit_event_id: Uuid::new_v4(),
                timestamp_utc: now,
                operator: operator.to_string(),
                action_type: format!("Job{status}"),
                case_id,
                evidence_item_id: None,
                summary: format!("Job {job_id}: {status_message}"),
                json_payload: serde_json::json!({ "jobId": job_id, "status": status.to_string() }),
            },
        )
        .await?;

    tx.commit().await
}

pub(crate) async fn insert_evidence_item(tx: &mut Transaction<'_, sqlx::Sqlite>, item: &EvidenceItem) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "EvidenceItemRecord"
           ("EvidenceItemId", "CaseId", "DisplayName", "OriginalPath", "OriginalFileName", "AddedAtUtc",
            "SizeBytes", "Sha256Hex", "FileExtension", "SourceType", "ManifestRelativePath", "StoredRelativePath")
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
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn load_evidence_item(pool: &SqlitePool, evidence_item_id: EvidenceItemId) -> Result<EvidenceItem, CaseGraphError> {
    let row = sqlx::query(
        r#"SELECT "EvidenceItemId", "CaseId", "DisplayName", "OriginalPath", "OriginalFileName", "AddedAtUtc",
                  "SizeBytes", "Sha256Hex", "FileExtension", "SourceType", "ManifestRelativePath", "StoredRelativePath"
           FROM "EvidenceItemRecord" WHERE "EvidenceItemId" = ?"#,
    )
    .bind(evidence_item_id.to_string())
    .fetch_optional(pool)
    .await
    .map_err(|e| CaseGraphError::Unknown(e.into()))?
    .ok_or_else(|| CaseGraphError::evidence_not_found(evidence_item_id))?;

    row_to_evidence_item(&row).map_err(|e| CaseGraphError::Unknown(e.into()))
}

fn row_to_evidence_item(row: &sqlx::sqlite::SqliteRow) -> Result<EvidenceItem, sqlx::Error> {
    let evidence_item_id: String = row.try_get("EvidenceItemId")?;
    let case_id: String = row.try_get("CaseId")?;
    let added_at_utc: String = row.try_get("AddedAtUtc")?;
    let size_bytes: i64 = row.try_get("SizeBytes")?;
    let source_type: String = row.try_get("SourceType")?;

    Ok(EvidenceItem {
        evidence_item_id: parse_uuid(&evidence_item_id)?,
        case_id: parse_uuid(&case_id)?,
        display_name: row.try_get("DisplayName")?,
        original_path: row.try_get("OriginalPath")?,
        original_file_name: row.try_get("OriginalFileName")?,
        added_at_utc: parse_timestamp(&added_at_utc)?,
        size_bytes: size_bytes as u64,
        sha256_hex: row.try_get("Sha256Hex")?,
        file_extension: row.try_get("FileExtension")?,
        source_type: source_type.parse::<SourceType>().map_err(|e: CaseGraphError| sqlx::Error::Decode(Box::new(e)))?,
        manifest_relative_path: row.try_get("ManifestRelativePath")?,
        stored_relative_path: row.try_get("StoredRelativePath")?,
    })
}

/// Per-platform message counts for the `MessagesIngested` audit row
/// (`spec.md §4.4`: "Emit a `MessagesIngested` audit row with per-platform
/// counts").
pub(crate) async fn count_messages_by_platform(pool: &SqlitePool, evidence_item_id: EvidenceItemId) -> Result<Value, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "Platform", COUNT(*) AS "Count" FROM "MessageEventRecord" WHERE "EvidenceItemId" = ? GROUP BY "Platform""#,
    )
    .bind(evidence_item_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut counts = serde_json::Map::new();
    for row in rows {
        let platform: String = row.try_get("Platform")?;
        let count: i64 = row.try_get("Count")?;
        counts.insert(platform, serde_json::json!(count));
    }
    Ok(Value::Object(counts))
}

/// Build a fresh `Queued` [`Job`] row for [`insert_queued_job`].
pub(crate) fn new_queued_job(
    job_id: JobId,
    now: DateTime<Utc>,
    job_type: &str,
    case_id: Option<CaseId>,
    evidence_item_id: Option<EvidenceItemId>,
    json_payload: Value,
    correlation_id: CorrelationId,
    operator: &str,
) -> Job {
    Job {
        job_id,
        created_at_utc: now,
        started_at_utc: None,
        completed_at_utc: None,
        status: JobStatus::Queued,
        job_type: job_type.to_string(),
        case_id,
        evidence_item_id,
        progress: 0.0,
        status_message: "Queued".to_string(),
        error_message: None,
        json_payload,
        correlation_id,
        operator: operator.to_string(),
    }
}
