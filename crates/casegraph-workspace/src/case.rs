//! Case lifecycle: create/open/list/delete, plus legacy `case.json`/
//! `manifest.json` directory adoption (`spec.md §4.1`, `§3` "Lifecycle
//! invariants"; `SPEC_FULL.md` §C.4).
//!
//! "Owns" in `spec.md §3`'s data model means cascade-delete; `TargetRecord`,
//! `IdentifierRecord`, and `EvidenceItemRecord` carry an actual `CaseId`
//! foreign key the store now enforces (`PRAGMA foreign_keys = ON`,
//! `casegraph-store::init::open_pool`), but `MessageThreadRecord`/
//! `MessageEventRecord`/`TargetMessagePresenceRecord` only carry `CaseId`
//! as a plain column for query convenience, not a constraint. `delete_case`
//! therefore deletes every owned table explicitly, in dependency order,
//! rather than relying on cascade alone.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::fs;
use uuid::Uuid;

use casegraph_clock::WorkspacePaths;
use casegraph_store::snapshot;
use casegraph_store::AuditLog;
use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::CaseId;
use casegraph_types::model::Case;

use crate::Workspace;

/// A case row plus its evidence count, as returned by [`list_cases`].
#[derive(Debug, Clone, PartialEq)]
pub struct CaseSummary {
    pub case: Case,
    pub evidence_count: u32,
}

/// Outcome of [`adopt_case_directory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdoptionOutcome {
    /// `true` if a `CaseRecord` row did not already exist and was created
    /// from `case.json`.
    pub case_created: bool,
    /// Number of `EvidenceItemRecord` rows inserted or replaced from
    /// `manifest.json` files under the case's vault.
    pub evidence_adopted: u32,
}

/// `CreateCase` (`spec.md §3`: "A Case created ⇒ Case row +
/// `<casesRoot>/<caseId>/` directory"). Writes the row, the directory, and
/// the initial `case.json` snapshot, then appends a `CaseCreated` audit
/// row — all under the write gate.
pub async fn create_case(workspace: &Workspace, name: &str, operator: &str) -> Result<Case, CaseGraphError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CaseGraphError::InvalidArgument("case name must not be empty".to_string()));
    }

    let case_id = Uuid::new_v4();
    let now = workspace.clock().now_utc();
    let case = Case {
        case_id,
        name: name.to_string(),
        created_at_utc: now,
        last_opened_at_utc: None,
    };

    workspace
        .write_gate()
        .run_write("Workspace.createCase", || async {
            let mut tx = workspace.pool().begin().await?;
            sqlx::query(
                r#"INSERT INTO "CaseRecord" ("CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc") VALUES (?, ?, ?, NULL)"#,
            )
            .bind(case_id.to_string())
            .bind(&case.name)
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            audit(
                &mut tx,
                workspace.audit_log(),
                now,
                operator,
                "CaseCreated",
                case_id,
                format!("Created case \"{}\"", case.name),
                serde_json::json!({ "caseId": case_id, "name": case.name }),
            )
            .await?;
            tx.commit().await
        })
        .await?;

    snapshot::write_case_snapshot(workspace.pool(), workspace.paths(), case_id).await?;
    Ok(case)
}

/// `OpenCase`: bump `lastOpenedAtUtc` and rewrite `case.json`. A read-mostly
/// lifecycle transition, but still goes through the gate since it mutates
/// `CaseRecord`.
pub async fn open_case(workspace: &Workspace, case_id: CaseId, operator: &str) -> Result<Case, CaseGraphError> {
    let now = workspace.clock().now_utc();

    workspace
        .write_gate()
        .run_write("Workspace.openCase", || async {
            let mut tx = workspace.pool().begin().await?;
            let updated = sqlx::query(r#"UPDATE "CaseRecord" SET "LastOpenedAtUtc" = ? WHERE "CaseId" = ?"#)
                .bind(now.to_rfc3339())
                .bind(case_id.to_string())
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if updated > 0 {
                audit(
                    &mut tx,
                    workspace.audit_log(),
                    now,
                    operator,
                    "CaseOpened",
                    case_id,
                    "Opened case".to_string(),
                    serde_json::json!({ "caseId": case_id }),
                )
                .await?;
            }
            tx.commit().await
        })
        .await?;

    let case = load_case(workspace.pool(), case_id).await?;
    snapshot::write_case_snapshot(workspace.pool(), workspace.paths(), case_id).await?;
    Ok(case)
}

/// List every case with its evidence count, ordered by `createdAtUtc`
/// ascending (the same order [`crate::query`]'s paged listing uses before
/// any caller-supplied ordering is applied).
pub async fn list_cases(pool: &SqlitePool) -> Result<Vec<CaseSummary>, CaseGraphError> {
    let rows = sqlx::query(
        r#"SELECT c."CaseId", c."Name", c."CreatedAtUtc", c."LastOpenedAtUtc",
                  (SELECT COUNT(*) FROM "EvidenceItemRecord" e WHERE e."CaseId" = c."CaseId") AS "EvidenceCount"
           FROM "CaseRecord" c
           ORDER BY c."CreatedAtUtc" ASC"#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| CaseGraphError::Unknown(e.into()))?;

    rows.iter()
        .map(|row| {
            Ok(CaseSummary {
                case: row_to_case(row)?,
                evidence_count: row.try_get::<i64, _>("EvidenceCount").map_err(|e| CaseGraphError::Unknown(e.into()))? as u32,
            })
        })
        .collect()
}

/// `DeleteCase`: delete every row this case owns (`spec.md §3`:
/// "Deleting a Case cascades to all owned rows except GlobalPerson
/// (weak)"), then remove the case's directory tree from disk. The
/// `GlobalPersonRecord`/`PersonAliasRecord`/`PersonIdentifierRecord` rows a
/// deleted target may have pointed at are untouched — they are a weak,
/// cross-case reference, not an owned subtree.
pub async fn delete_case(workspace: &Workspace, case_id: CaseId, operator: &str) -> Result<(), CaseGraphError> {
    let now = workspace.clock().now_utc();
    let case = load_case(workspace.pool(), case_id).await?;

    workspace
        .write_gate()
        .run_write("Workspace.deleteCase", || async {
            let mut tx = workspace.pool().begin().await?;

            // Leaf-first: presence rows, then participant links, then
            // message rows, then identifiers/targets, then evidence, then
            // the case itself. `TargetIdentifierLinkRecord` and
            // `TargetAliasRecord` cascade from their `TargetRecord`/
            // `IdentifierRecord` FKs once those are deleted, but deleting
            // them explicitly keeps this correct even if the pragma is
            // ever turned back off.
            for (table, column) in [
                ("TargetMessagePresenceRecord", "CaseId"),
                ("MessageParticipantLinkRecord", "CaseId"),
                ("TargetIdentifierLinkRecord", "CaseId"),
                ("TargetAliasRecord", "CaseId"),
                ("MessageParticipantRecord", "ThreadId"),
            ] {
                if table == "MessageParticipantRecord" {
                    sqlx::query(
                        r#"DELETE FROM "MessageParticipantRecord" WHERE "ThreadId" IN
                           (SELECT "ThreadId" FROM "MessageThreadRecord" WHERE "CaseId" = ?)"#,
                    )
                    .bind(case_id.to_string())
                    .execute(&mut *tx)
                    .await?;
                    continue;
                }
                let sql = format!(r#"DELETE FROM "{table}" WHERE "{column}" = ?"#);
                sqlx::query(&sql).bind(case_id.to_string()).execute(&mut *tx).await?;
            }

            sqlx::query(r#"DELETE FROM "MessageEventRecord" WHERE "CaseId" = ?"#)
                .bind(case_id.to_string())
                .execute(&mut *tx)
                .await?;
            sqlx::query(r#"DELETE FROM "MessageThreadRecord" WHERE "CaseId" = ?"#)
                .bind(case_id.to_string())
                .execute(&mut *tx)
                .await?;
            sqlx::query(r#"DELETE FROM "IdentifierRecord" WHERE "CaseId" = ?"#)
                .bind(case_id.to_string())
                .execute(&mut *tx)
                .await?;
            sqlx::query(r#"DELETE FROM "TargetRecord" WHERE "CaseId" = ?"#)
                .bind(case_id.to_string())
                .execute(&mut *tx)
                .await?;
            sqlx::query(r#"DELETE FROM "EvidenceItemRecord" WHERE "CaseId" = ?"#)
                .bind(case_id.to_string())
                .execute(&mut *tx)
                .await?;
            sqlx::query(r#"DELETE FROM "CaseRecord" WHERE "CaseId" = ?"#)
                .bind(case_id.to_string())
                .execute(&mut *tx)
                .await?;

            audit(
                &mut tx,
                workspace.audit_log(),
                now,
                operator,
                "CaseDeleted",
                case_id,
                format!("Deleted case \"{}\"", case.name),
                serde_json::json!({ "caseId": case_id }),
            )
            .await?;
            tx.commit().await
        })
        .await?;

    let case_dir = workspace.paths().case_dir(case_id);
    match fs::remove_dir_all(&case_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(CaseGraphError::Unknown(e.into())),
    }

    Ok(())
}

/// `Workspace::adopt_case_directory` (`SPEC_FULL.md` §C.4): re-adopt one
/// case directory from its `case.json`/`manifest.json` files, the same
/// walk `casegraph_store::init`'s Rebuilder performs for the whole
/// `cases/` tree, scoped to a single case. Useful after copying a case
/// directory in from another workspace, or recovering a case the database
/// lost track of without quarantining the whole file.
pub async fn adopt_case_directory(workspace: &Workspace, case_id: CaseId, operator: &str) -> Result<AdoptionOutcome, CaseGraphError> {
    let paths = workspace.paths();
    let case_json_path = paths.case_snapshot_path(case_id);
    let snapshot = snapshot::read_case_snapshot(&case_json_path)
        .await?
        .ok_or_else(|| CaseGraphError::NotFound(format!("case.json for {case_id}")))?;

    let now = workspace.clock().now_utc();
    let case_created = !case_exists(workspace.pool(), case_id).await?;

    let mut evidence_adopted = 0u32;
    workspace
        .write_gate()
        .run_write("Workspace.adoptCaseDirectory", || async {
            let mut tx = workspace.pool().begin().await?;
            sqlx::query(
                r#"INSERT OR REPLACE INTO "CaseRecord" ("CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc") VALUES (?, ?, ?, ?)"#,
            )
            .bind(case_id.to_string())
            .bind(&snapshot.case_info.name)
            .bind(snapshot.case_info.created_at_utc.to_rfc3339())
            .bind(snapshot.case_info.last_opened_at_utc.map(|t| t.to_rfc3339()))
            .execute(&mut *tx)
            .await?;

            for item in &snapshot.evidence {
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
                .execute(&mut *tx)
                .await?;
            }
            evidence_adopted = snapshot.evidence.len() as u32;

            audit(
                &mut tx,
                workspace.audit_log(),
                now,
                operator,
                "CaseDirectoryAdopted",
                case_id,
                format!("Adopted case directory {case_id} ({evidence_adopted} evidence item(s))"),
                serde_json::json!({ "caseId": case_id, "evidenceAdopted": evidence_adopted }),
            )
            .await?;
            tx.commit().await
        })
        .await?;

    Ok(AdoptionOutcome {
        case_created,
        evidence_adopted,
    })
}

async fn case_exists(pool: &SqlitePool, case_id: CaseId) -> Result<bool, CaseGraphError> {
    let row: Option<i64> = sqlx::query_scalar(r#"SELECT 1 FROM "CaseRecord" WHERE "CaseId" = ?"#)
        .bind(case_id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?;
    Ok(row.is_some())
}

async fn load_case(pool: &SqlitePool, case_id: CaseId) -> Result<Case, CaseGraphError> {
    let row = sqlx::query(r#"SELECT "CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc" FROM "CaseRecord" WHERE "CaseId" = ?"#)
        .bind(case_id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?
        .ok_or_else(|| CaseGraphError::case_not_found(case_id))?;
    row_to_case(&row)
}

pub(crate) fn row_to_case(row: &sqlx::sqlite::SqliteRow) -> Result<Case, CaseGraphError> {
    let case_id: String = row.try_get("CaseId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let created_at_utc: String = row.try_get("CreatedAtUtc").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let last_opened_at_utc: Option<String> = row.try_get("LastOpenedAtUtc").map_err(|e| CaseGraphError::Unknown(e.into()))?;

    Ok(Case {
        case_id: Uuid::parse_str(&case_id).map_err(|e| CaseGraphError::Unknown(e.into()))?,
        name: row.try_get("Name").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        created_at_utc: chrono::DateTime::parse_from_rfc3339(&created_at_utc)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CaseGraphError::Unknown(e.into()))?,
        last_opened_at_utc: last_opened_at_utc
            .map(|s| {
                chrono::DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| CaseGraphError::Unknown(e.into()))
            })
            .transpose()?,
    })
}

async fn audit(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    audit_log: &AuditLog,
    now: chrono::DateTime<Utc>,
    operator: &str,
    action_type: &str,
    case_id: CaseId,
    summary: String,
    json_payload: serde_json::Value,
) -> Result<(), sqlx::Error> {
    audit_log
        .append(
            tx,
            casegraph_types::model::AuditEvent {
                audit_event_id: Uuid::new_v4(),
                timestamp_utc: now,
                operator: operator.to_string(),
                action_type: action_type.to_string(),
                case_id: Some(case_id),
                evidence_item_id: None,
                summary,
                json_payload,
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_clock::WorkspacePaths;
    use tempfile::tempdir;

    use crate::Workspace;

    #[tokio::test]
    async fn create_then_list_then_delete_case() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let workspace = Workspace::open(paths).await.unwrap();

        let case = create_case(&workspace, "Op Redwood", "tester").await.unwrap();
        assert!(workspace.paths().case_snapshot_path(case.case_id).exists());

        let cases = list_cases(workspace.pool()).await.unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].case.name, "Op Redwood");
        assert_eq!(cases[0].evidence_count, 0);

        let opened = open_case(&workspace, case.case_id, "tester").await.unwrap();
        assert!(opened.last_opened_at_utc.is_some());

        delete_case(&workspace, case.case_id, "tester").await.unwrap();
        let cases = list_cases(workspace.pool()).await.unwrap();
        assert!(cases.is_empty());
        assert!(!workspace.paths().case_dir(case.case_id).exists());
    }

    #[tokio::test]
    async fn rejects_empty_case_name() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let workspace = Workspace::open(paths).await.unwrap();

        let result = create_case(&workspace, "   ", "tester").await;
        assert!(matches!(result, Err(CaseGraphError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn adopt_case_directory_restores_from_disk() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let workspace = Workspace::open(paths).await.unwrap();

        let case = create_case(&workspace, "Recovered Case", "tester").await.unwrap();
        // `case.json` is written by `create_case` itself; capture it before
        // deleting the row so the adoption path below has something to read.
        let case_json_path = workspace.paths().case_snapshot_path(case.case_id);
        let case_json = fs::read(&case_json_path).await.unwrap();

        delete_case(&workspace, case.case_id, "tester").await.unwrap();

        // `delete_case` removed the directory too, so restore it the way a
        // case directory copied in from another workspace would look.
        fs::create_dir_all(workspace.paths().case_dir(case.case_id)).await.unwrap();
        fs::write(&case_json_path, &case_json).await.unwrap();

        let outcome = adopt_case_directory(&workspace, case.case_id, "tester").await.unwrap();
        assert!(outcome.case_created);
        assert_eq!(outcome.evidence_adopted, 0);

        let cases = list_cases(workspace.pool()).await.unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].case.case_id, case.case_id);
    }
}
