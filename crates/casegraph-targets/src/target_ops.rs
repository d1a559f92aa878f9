//! `CreateTarget`, `UpdateTarget`, `AddAlias`, `RemoveAlias`
//! (`spec.md §4.6`).

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use casegraph_store::{AuditLog, WriteGate};
use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::{AliasId, CaseId, GlobalPersonId, TargetId};
use casegraph_types::model::{Target, TargetAlias};

use crate::support::audit;

/// How a new [`Target`] links (or doesn't) to the cross-case global-person
/// registry; an enum instead of the source spec's `createGlobalPerson`
/// boolean XOR `globalEntityId` pair, since the two are mutually exclusive
/// by construction this way.
#[derive(Debug, Clone, Copy)]
pub enum GlobalPersonLink {
    /// No cross-case identity.
    None,
    /// Create a new [`GlobalPerson`] row and link it to the target.
    CreateNew,
    /// Link to an existing [`GlobalPerson`] by id.
    Existing(GlobalPersonId),
}

/// Create a [`Target`] within `case_id`.
pub async fn create_target(
    pool: &SqlitePool,
    gate: &WriteGate,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    case_id: CaseId,
    display_name: &str,
    primary_alias: Option<&str>,
    global_person_link: GlobalPersonLink,
    source_type: &str,
    source_locator: &str,
    ingest_module_version: &str,
    operator: &str,
) -> Result<Target, CaseGraphError> {
    let display_name = display_name.trim();
    if display_name.is_empty() {
        return Err(CaseGraphError::InvalidArgument("target display name must not be empty".to_string()));
    }

    gate.run_write("TargetRegistry.createTarget", || async {
        let mut tx = pool.begin().await?;

        let target_id = Uuid::new_v4();
        let global_entity_id = match global_person_link {
            GlobalPersonLink::None => None,
            GlobalPersonLink::Existing(id) => Some(id),
            GlobalPersonLink::CreateNew => {
                let global_person_id = Uuid::new_v4();
                sqlx::query(
                    r#"INSERT INTO "GlobalPersonRecord"
                       ("GlobalPersonId", "DisplayName", "Notes", "CreatedAtUtc", "UpdatedAtUtc")
                       VALUES (?, ?, NULL, ?, ?)"#,
                )
                .bind(global_person_id.to_string())
                .bind(display_name)
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .execute(&mut *tx)
                .await?;
                Some(global_person_id)
            }
        };

        sqlx::query(
            r#"INSERT INTO "TargetRecord"
               ("TargetId", "CaseId", "DisplayName", "PrimaryAlias", "Notes", "CreatedAtUtc", "UpdatedAtUtc",
                "SourceType", "SourceLocator", "IngestModuleVersion", "GlobalEntityId")
               VALUES (?, ?, ?, ?, NULL, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(target_id.to_string())
        .bind(case_id.to_string())
        .bind(display_name)
        .bind(primary_alias)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(source_type)
        .bind(source_locator)
        .bind(ingest_module_version)
        .bind(global_entity_id.map(|id| id.to_string()))
        .execute(&mut *tx)
        .await?;

        if let Some(alias) = primary_alias {
            sqlx::query(
                r#"INSERT INTO "TargetAliasRecord" ("AliasId", "TargetId", "CaseId", "Alias", "AliasNormalized")
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(target_id.to_string())
            .bind(case_id.to_string())
            .bind(alias)
            .bind(alias.trim().to_ascii_lowercase())
            .execute(&mut *tx)
            .await?;
        }

        audit(
            &mut tx,
            audit_log,
            now,
            operator,
            "TargetCreated",
            Some(case_id),
            format!("Target \"{display_name}\" created."),
            serde_json::json!({ "targetId": target_id, "displayName": display_name }),
        )
        .await?;

        tx.commit().await?;

        Ok(Target {
            target_id,
            case_id,
            display_name: display_name.to_string(),
            primary_alias: primary_alias.map(|s| s.to_string()),
            notes: None,
            created_at_utc: now,
            updated_at_utc: now,
            source_type: source_type.to_string(),
            source_locator: source_locator.to_string(),
            ingest_module_version: ingest_module_version.to_string(),
            global_entity_id,
        })
    })
    .await
}

/// Update a target's `displayName`/`notes`, refreshing `updatedAtUtc`.
pub async fn update_target(
    pool: &SqlitePool,
    gate: &WriteGate,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    target_id: TargetId,
    display_name: Option<&str>,
    notes: Option<Option<&str>>,
    operator: &str,
) -> Result<(), CaseGraphError> {
    if let Some(name) = display_name {
        if name.trim().is_empty() {
            return Err(CaseGraphError::InvalidArgument("target display name must not be empty".to_string()));
        }
    }

    gate.run_write("TargetRegistry.updateTarget", || async {
        let mut tx = pool.begin().await?;

        let row = sqlx::query(r#"SELECT "CaseId" FROM "TargetRecord" WHERE "TargetId" = ?"#)
            .bind(target_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return crate::support::abort(CaseGraphError::NotFound(format!("target {target_id}")));
        };
        let case_id_str: String = row.get("CaseId");
        let case_id = Uuid::parse_str(&case_id_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        if let Some(name) = display_name {
            sqlx::query(r#"UPDATE "TargetRecord" SET "DisplayName" = ?, "UpdatedAtUtc" = ? WHERE "TargetId" = ?"#)
                .bind(name)
                .bind(now.to_rfc3339())
                .bind(target_id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        if let Some(notes) = notes {
            sqlx::query(r#"UPDATE "TargetRecord" SET "Notes" = ?, "UpdatedAtUtc" = ? WHERE "TargetId" = ?"#)
                .bind(notes)
                .bind(now.to_rfc3339())
                .bind(target_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        audit(
            &mut tx,
            audit_log,
            now,
            operator,
            "TargetUpdated",
            Some(case_id),
            format!("Target {target_id} updated."),
            serde_json::json!({ "targetId": target_id }),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    })
    .await
    .map_err(crate::support::unwrap_conflict)
}

/// Add an alias to a target.
pub async fn add_alias(
    pool: &SqlitePool,
    gate: &WriteGate,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    case_id: CaseId,
    target_id: TargetId,
    alias: &str,
    operator: &str,
) -> Result<TargetAlias, CaseGraphError> {
    let alias = alias.trim();
    if alias.is_empty() {
        return Err(CaseGraphError::InvalidArgument("alias must not be empty".to_string()));
    }
    let alias_normalized = alias.to_ascii_lowercase();
    let alias_id = Uuid::new_v4();

    gate.run_write("TargetRegistry.addAlias", || async {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO "TargetAliasRecord" ("AliasId", "TargetId", "CaseId", "Alias", "AliasNormalized")
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT("CaseId", "AliasNormalized", "TargetId") DO NOTHING"#,
        )
        .bind(alias_id.to_string())
        .bind(target_id.to_string())
        .bind(case_id.to_string())
        .bind(alias)
        .bind(&alias_normalized)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"UPDATE "TargetRecord" SET "UpdatedAtUtc" = ? WHERE "TargetId" = ?"#)
            .bind(now.to_rfc3339())
            .bind(target_id.to_string())
            .execute(&mut *tx)
            .await?;

        audit(
            &mut tx,
            audit_log,
            now,
            operator,
            "AliasAdded",
            Some(case_id),
            format!("Alias \"{alias}\" added to target {target_id}."),
            serde_json::json!({ "targetId": target_id, "alias": alias }),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    })
    .await?;

    Ok(TargetAlias {
        alias_id,
        target_id,
        case_id,
        alias: alias.to_string(),
        alias_normalized,
    })
}

/// Remove an alias from a target.
pub async fn remove_alias(
    pool: &SqlitePool,
    gate: &WriteGate,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    case_id: CaseId,
    alias_id: AliasId,
    operator: &str,
) -> Result<(), CaseGraphError> {
    gate.run_write("TargetRegistry.removeAlias", || async {
        let mut tx = pool.begin().await?;

        let row = sqlx::query(r#"SELECT "TargetId" FROM "TargetAliasRecord" WHERE "AliasId" = ?"#)
            .bind(alias_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return crate::support::abort(CaseGraphError::NotFound(format!("alias {alias_id}")));
        };
        let target_id: String = row.get("TargetId");

        sqlx::query(r#"DELETE FROM "TargetAliasRecord" WHERE "AliasId" = ?"#)
            .bind(alias_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(r#"UPDATE "TargetRecord" SET "UpdatedAtUtc" = ? WHERE "TargetId" = ?"#)
            .bind(now.to_rfc3339())
            .bind(&target_id)
            .execute(&mut *tx)
            .await?;

        audit(
            &mut tx,
            audit_log,
            now,
            operator,
            "AliasRemoved",
            Some(case_id),
            format!("Alias {alias_id} removed from target {target_id}."),
            serde_json::json!({ "aliasId": alias_id, "targetId": target_id }),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    })
    .await
    .map_err(crate::support::unwrap_conflict)
}
