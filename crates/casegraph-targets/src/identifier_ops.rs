//! `AddIdentifier`, `UpdateIdentifier`, `RemoveIdentifier`, and the
//! cross-case global-person identifier sync (`spec.md §4.6`).

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use casegraph_store::{AuditLog, WriteGate};
use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::{CaseId, IdentifierId, TargetId};
use casegraph_types::model::IdentifierType;

use crate::conflict::{GlobalPersonConflictStrategy, IdentifierConflictStrategy};
use crate::normalize::normalize;
use crate::support::{abort, audit, unwrap_conflict};

/// Outcome of [`add_identifier`]/[`update_identifier`]: the identifier that
/// now exists, and which target it is effectively linked to once conflict
/// resolution has run.
#[derive(Debug, Clone, Copy)]
pub struct IdentifierLinkOutcome {
    pub identifier_id: IdentifierId,
    pub effective_target_id: TargetId,
    /// `true` if a new `TargetIdentifierLinkRecord` row was inserted for
    /// `effective_target_id` by this call.
    pub link_created: bool,
}

/// Link `value_raw` (of `identifier_type`) to `target_id`, creating the
/// `Identifier` row if it doesn't already exist in `case_id`, resolving any
/// conflict with `strategy` (`spec.md §4.6`, "AddIdentifier / UpdateIdentifier").
#[allow(clippy::too_many_arguments)]
pub async fn add_identifier(
    pool: &SqlitePool,
    gate: &WriteGate,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    case_id: CaseId,
    target_id: TargetId,
    identifier_type: IdentifierType,
    value_raw: &str,
    is_primary: bool,
    strategy: IdentifierConflictStrategy,
    global_person_strategy: GlobalPersonConflictStrategy,
    source_type: &str,
    source_locator: &str,
    ingest_module_version: &str,
    operator: &str,
) -> Result<IdentifierLinkOutcome, CaseGraphError> {
    let value_normalized = normalize(identifier_type, value_raw)?;

    gate.run_write("TargetRegistry.addIdentifier", || async {
        let mut tx = pool.begin().await?;
        let outcome = link_identifier(
            &mut tx,
            audit_log,
            now,
            case_id,
            target_id,
            identifier_type,
            value_raw,
            &value_normalized,
            is_primary,
            strategy,
            global_person_strategy,
            source_type,
            source_locator,
            ingest_module_version,
            operator,
        )
        .await?;
        tx.commit().await?;
        Ok(outcome)
    })
    .await
    .map_err(unwrap_conflict)
}

/// As [`add_identifier`], but for a caller that already knows the
/// identifier exists and only wants to change which target it is linked to
/// or whether it is primary; behaves identically since linking is
/// idempotent on `(target_id, identifier_id)`.
#[allow(clippy::too_many_arguments)]
pub async fn update_identifier(
    pool: &SqlitePool,
    gate: &WriteGate,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    case_id: CaseId,
    target_id: TargetId,
    identifier_type: IdentifierType,
    value_raw: &str,
    is_primary: bool,
    strategy: IdentifierConflictStrategy,
    global_person_strategy: GlobalPersonConflictStrategy,
    source_type: &str,
    source_locator: &str,
    ingest_module_version: &str,
    operator: &str,
) -> Result<IdentifierLinkOutcome, CaseGraphError> {
    add_identifier(
        pool,
        gate,
        audit_log,
        now,
        case_id,
        target_id,
        identifier_type,
        value_raw,
        is_primary,
        strategy,
        global_person_strategy,
        source_type,
        source_locator,
        ingest_module_version,
        operator,
    )
    .await
}

/// Core of `AddIdentifier`/`UpdateIdentifier`/`LinkMessageParticipant`:
/// find-or-create the `Identifier` row, resolve any existing-target
/// conflict, link it to `target_id`, and sync it into the global-person
/// registry if the target is cross-case linked.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn link_identifier(
    tx: &mut Transaction<'_, Sqlite>,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    case_id: CaseId,
    target_id: TargetId,
    identifier_type: IdentifierType,
    value_raw: &str,
    value_normalized: &str,
    is_primary: bool,
    strategy: IdentifierConflictStrategy,
    global_person_strategy: GlobalPersonConflictStrategy,
    source_type: &str,
    source_locator: &str,
    ingest_module_version: &str,
    operator: &str,
) -> Result<IdentifierLinkOutcome, sqlx::Error> {
    let identifier_id = find_or_create_identifier(
        tx,
        case_id,
        identifier_type,
        value_raw,
        value_normalized,
        source_type,
        source_locator,
        ingest_module_version,
    )
    .await?;

    let conflicting = sqlx::query(
        r#"SELECT l."TargetId" AS "TargetId", t."DisplayName" AS "DisplayName"
           FROM "TargetIdentifierLinkRecord" l
           JOIN "TargetRecord" t ON t."TargetId" = l."TargetId"
           WHERE l."IdentifierId" = ? AND l."TargetId" != ?"#,
    )
    .bind(identifier_id.to_string())
    .bind(target_id.to_string())
    .fetch_optional(&mut **tx)
    .await?;

    let mut effective_target_id = target_id;
    let mut link_created = false;
    let mut moved_from_target: Option<Uuid> = None;

    if let Some(row) = conflicting {
        let existing_target_id: String = row.get("TargetId");
        let existing_target_id = Uuid::parse_str(&existing_target_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let existing_target_name: String = row.get("DisplayName");

        match strategy {
            IdentifierConflictStrategy::Cancel => {
                return abort(CaseGraphError::IdentifierConflict {
                    existing_target_id,
                    existing_target_name,
                });
            }
            IdentifierConflictStrategy::UseExistingTarget => {
                effective_target_id = existing_target_id;
            }
            IdentifierConflictStrategy::KeepExistingAndAlsoLinkToRequestedTarget => {
                link_created =
                    upsert_link(tx, case_id, target_id, identifier_id, false, source_type, source_locator, ingest_module_version)
                        .await?;
            }
            IdentifierConflictStrategy::MoveIdentifierToRequestedTarget => {
                sqlx::query(r#"DELETE FROM "TargetIdentifierLinkRecord" WHERE "IdentifierId" = ?"#)
                    .bind(identifier_id.to_string())
                    .execute(&mut **tx)
                    .await?;
                link_created = upsert_link(
                    tx,
                    case_id,
                    target_id,
                    identifier_id,
                    is_primary,
                    source_type,
                    source_locator,
                    ingest_module_version,
                )
                .await?;
                moved_from_target = Some(existing_target_id);
            }
        }
    } else {
        link_created = upsert_link(
            tx,
            case_id,
            target_id,
            identifier_id,
            is_primary,
            source_type,
            source_locator,
            ingest_module_version,
        )
        .await?;
    }

    if is_primary && effective_target_id == target_id {
        clear_sibling_primary_links(tx, target_id, identifier_type, identifier_id).await?;
    }

    if let Some(existing_target_id) = moved_from_target {
        audit(
            tx,
            audit_log,
            now,
            operator,
            "IdentifierUnlinkedFromTarget",
            Some(case_id),
            format!("Identifier {identifier_type} \"{value_raw}\" unlinked from target {existing_target_id}."),
            serde_json::json!({
                "identifierId": identifier_id,
                "targetId": existing_target_id,
                "type": identifier_type.to_string(),
            }),
        )
        .await?;

        audit(
            tx,
            audit_log,
            now,
            operator,
            "IdentifierLinkedToTarget",
            Some(case_id),
            format!("Identifier {identifier_type} \"{value_raw}\" linked to target {effective_target_id}."),
            serde_json::json!({
                "identifierId": identifier_id,
                "targetId": effective_target_id,
                "type": identifier_type.to_string(),
            }),
        )
        .await?;
    } else {
        audit(
            tx,
            audit_log,
            now,
            operator,
            "IdentifierAdded",
            Some(case_id),
            format!("Identifier {identifier_type} \"{value_raw}\" linked to target {effective_target_id}."),
            serde_json::json!({
                "identifierId": identifier_id,
                "targetId": effective_target_id,
                "type": identifier_type.to_string(),
            }),
        )
        .await?;
    }

    if effective_target_id == target_id {
        sync_identifier_to_global_person(
            tx,
            audit_log,
            now,
            target_id,
            identifier_type,
            value_raw,
            value_normalized,
            is_primary,
            global_person_strategy,
            operator,
        )
        .await?;
    }

    Ok(IdentifierLinkOutcome {
        identifier_id,
        effective_target_id,
        link_created,
    })
}

async fn find_or_create_identifier(
    tx: &mut Transaction<'_, Sqlite>,
    case_id: CaseId,
    identifier_type: IdentifierType,
    value_raw: &str,
    value_normalized: &str,
    source_type: &str,
    source_locator: &str,
    ingest_module_version: &str,
) -> Result<IdentifierId, sqlx::Error> {
    let existing = sqlx::query(
        r#"SELECT "IdentifierId" FROM "IdentifierRecord" WHERE "CaseId" = ? AND "Type" = ? AND "ValueNormalized" = ?"#,
    )
    .bind(case_id.to_string())
    .bind(identifier_type.to_string())
    .bind(value_normalized)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(row) = existing {
        let id: String = row.get("IdentifierId");
        return Uuid::parse_str(&id).map_err(|e| sqlx::Error::Decode(Box::new(e)));
    }

    let identifier_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO "IdentifierRecord"
           ("IdentifierId", "CaseId", "Type", "ValueRaw", "ValueNormalized", "Notes",
            "SourceType", "SourceLocator", "IngestModuleVersion")
           VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?)"#,
    )
    .bind(identifier_id.to_string())
    .bind(case_id.to_string())
    .bind(identifier_type.to_string())
    .bind(value_raw)
    .bind(value_normalized)
    .bind(source_type)
    .bind(source_locator)
    .bind(ingest_module_version)
    .execute(&mut **tx)
    .await?;

    Ok(identifier_id)
}

/// Insert a `TargetIdentifierLinkRecord` if one doesn't already exist for
/// `(target_id, identifier_id)`; otherwise refresh its `IsPrimary` flag.
/// Returns whether a row was newly inserted.
#[allow(clippy::too_many_arguments)]
async fn upsert_link(
    tx: &mut Transaction<'_, Sqlite>,
    case_id: CaseId,
    target_id: TargetId,
    identifier_id: IdentifierId,
    is_primary: bool,
    source_type: &str,
    source_locator: &str,
    ingest_module_version: &str,
) -> Result<bool, sqlx::Error> {
    let existing = sqlx::query(
        r#"SELECT "LinkId" FROM "TargetIdentifierLinkRecord" WHERE "TargetId" = ? AND "IdentifierId" = ?"#,
    )
    .bind(target_id.to_string())
    .bind(identifier_id.to_string())
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(row) = existing {
        let link_id: String = row.get("LinkId");
        sqlx::query(r#"UPDATE "TargetIdentifierLinkRecord" SET "IsPrimary" = ? WHERE "LinkId" = ?"#)
            .bind(is_primary)
            .bind(link_id)
            .execute(&mut **tx)
            .await?;
        return Ok(false);
    }

    sqlx::query(
        r#"INSERT INTO "TargetIdentifierLinkRecord"
           ("LinkId", "CaseId", "TargetId", "IdentifierId", "IsPrimary", "SourceType", "SourceLocator", "IngestModuleVersion")
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(case_id.to_string())
    .bind(target_id.to_string())
    .bind(identifier_id.to_string())
    .bind(is_primary)
    .bind(source_type)
    .bind(source_locator)
    .bind(ingest_module_version)
    .execute(&mut **tx)
    .await?;
    Ok(true)
}

/// At most one primary link per `(target_id, identifier type)`
/// (`spec.md §4.6`, "IsPrimary semantics").
async fn clear_sibling_primary_links(
    tx: &mut Transaction<'_, Sqlite>,
    target_id: TargetId,
    identifier_type: IdentifierType,
    keep_identifier_id: IdentifierId,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "TargetIdentifierLinkRecord"
           SET "IsPrimary" = 0
           WHERE "TargetId" = ?
             AND "IdentifierId" != ?
             AND "IdentifierId" IN (SELECT "IdentifierId" FROM "IdentifierRecord" WHERE "Type" = ?)"#,
    )
    .bind(target_id.to_string())
    .bind(keep_identifier_id.to_string())
    .bind(identifier_type.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Remove the `(target_id, identifier_id)` link; if no target or
/// participant link references the identifier afterward, delete it too.
pub async fn remove_identifier(
    pool: &SqlitePool,
    gate: &WriteGate,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    case_id: CaseId,
    target_id: TargetId,
    identifier_id: IdentifierId,
    operator: &str,
) -> Result<(), CaseGraphError> {
    gate.run_write("TargetRegistry.removeIdentifier", || async {
        let mut tx = pool.begin().await?;

        sqlx::query(r#"DELETE FROM "TargetIdentifierLinkRecord" WHERE "TargetId" = ? AND "IdentifierId" = ?"#)
            .bind(target_id.to_string())
            .bind(identifier_id.to_string())
            .execute(&mut *tx)
            .await?;

        let remaining_links: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM "TargetIdentifierLinkRecord" WHERE "IdentifierId" = ?"#,
        )
        .bind(identifier_id.to_string())
        .fetch_one(&mut *tx)
        .await?;
        let remaining_participants: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM "MessageParticipantLinkRecord" WHERE "IdentifierId" = ?"#,
        )
        .bind(identifier_id.to_string())
        .fetch_one(&mut *tx)
        .await?;

        if remaining_links == 0 && remaining_participants == 0 {
            sqlx::query(r#"DELETE FROM "IdentifierRecord" WHERE "IdentifierId" = ?"#)
                .bind(identifier_id.to_string())
                .execute(&mut *tx)
                .await?;

            audit(
                &mut tx,
                audit_log,
                now,
                operator,
                "IdentifierRemoved",
                Some(case_id),
                format!("Identifier {identifier_id} removed; no remaining links."),
                serde_json::json!({ "identifierId": identifier_id }),
            )
            .await?;
        } else {
            audit(
                &mut tx,
                audit_log,
                now,
                operator,
                "IdentifierUnlinked",
                Some(case_id),
                format!("Identifier {identifier_id} unlinked from target {target_id}."),
                serde_json::json!({ "identifierId": identifier_id, "targetId": target_id }),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    })
    .await
}

/// Sync a target's identifier into the cross-case `GlobalPerson` registry
/// when the target has a `globalEntityId` (`spec.md §4.6`, "Global-person
/// identifier conflict").
#[allow(clippy::too_many_arguments)]
async fn sync_identifier_to_global_person(
    tx: &mut Transaction<'_, Sqlite>,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    target_id: TargetId,
    identifier_type: IdentifierType,
    value_raw: &str,
    value_normalized: &str,
    is_primary: bool,
    strategy: GlobalPersonConflictStrategy,
    operator: &str,
) -> Result<(), sqlx::Error> {
    let target_row = sqlx::query(r#"SELECT "GlobalEntityId" FROM "TargetRecord" WHERE "TargetId" = ?"#)
        .bind(target_id.to_string())
        .fetch_optional(&mut **tx)
        .await?;
    let Some(target_row) = target_row else {
        return Ok(());
    };
    let global_entity_id: Option<String> = target_row.get("GlobalEntityId");
    let Some(global_entity_id) = global_entity_id else {
        return Ok(());
    };
    let mut global_person_id =
        Uuid::parse_str(&global_entity_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    let existing = sqlx::query(
        r#"SELECT "PersonIdentifierId", "GlobalPersonId" FROM "PersonIdentifierRecord"
           WHERE "Type" = ? AND "ValueNormalized" = ?"#,
    )
    .bind(identifier_type.to_string())
    .bind(value_normalized)
    .fetch_optional(&mut **tx)
    .await?;

    match existing {
        None => {
            sqlx::query(
                r#"INSERT INTO "PersonIdentifierRecord"
                   ("PersonIdentifierId", "GlobalPersonId", "Type", "ValueRaw", "ValueNormalized", "IsPrimary")
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(global_person_id.to_string())
            .bind(identifier_type.to_string())
            .bind(value_raw)
            .bind(value_normalized)
            .bind(is_primary)
            .execute(&mut **tx)
            .await?;
        }
        Some(row) => {
            let person_identifier_id: String = row.get("PersonIdentifierId");
            let existing_person_id_str: String = row.get("GlobalPersonId");
            let existing_person_id =
                Uuid::parse_str(&existing_person_id_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

            if existing_person_id == global_person_id {
                if is_primary {
                    sqlx::query(r#"UPDATE "PersonIdentifierRecord" SET "IsPrimary" = 1 WHERE "PersonIdentifierId" = ?"#)
                        .bind(&person_identifier_id)
                        .execute(&mut **tx)
                        .await?;
                }
            } else {
                let person_row = sqlx::query(r#"SELECT "DisplayName" FROM "GlobalPersonRecord" WHERE "GlobalPersonId" = ?"#)
                    .bind(existing_person_id.to_string())
                    .fetch_optional(&mut **tx)
                    .await?;
                let existing_display_name: String = person_row
                    .map(|r| r.get::<String, _>("DisplayName"))
                    .unwrap_or_else(|| "unknown".to_string());

                match strategy {
                    GlobalPersonConflictStrategy::Cancel => {
                        return abort(CaseGraphError::GlobalPersonIdentifierConflict {
                            existing_person_id,
                            existing_display_name,
                        });
                    }
                    GlobalPersonConflictStrategy::UseExistingPerson => {
                        sqlx::query(r#"UPDATE "TargetRecord" SET "GlobalEntityId" = ? WHERE "TargetId" = ?"#)
                            .bind(existing_person_id.to_string())
                            .bind(target_id.to_string())
                            .execute(&mut **tx)
                            .await?;
                        global_person_id = existing_person_id;
                    }
                    GlobalPersonConflictStrategy::MoveIdentifierToRequestedPerson => {
                        sqlx::query(r#"UPDATE "PersonIdentifierRecord" SET "GlobalPersonId" = ? WHERE "PersonIdentifierId" = ?"#)
                            .bind(global_person_id.to_string())
                            .bind(&person_identifier_id)
                            .execute(&mut **tx)
                            .await?;
                    }
                }
            }
        }
    }

    if is_primary {
        sqlx::query(
            r#"UPDATE "PersonIdentifierRecord" SET "IsPrimary" = 0
               WHERE "GlobalPersonId" = ? AND "ValueNormalized" != ?"#,
        )
        .bind(global_person_id.to_string())
        .bind(value_normalized)
        .execute(&mut **tx)
        .await?;
    }

    audit(
        tx,
        audit_log,
        now,
        operator,
        "GlobalPersonIdentifierSynced",
        None,
        format!("Identifier {identifier_type} \"{value_raw}\" synced to global person {global_person_id}."),
        serde_json::json!({ "globalPersonId": global_person_id, "type": identifier_type.to_string() }),
    )
    .await?;

    Ok(())
}
