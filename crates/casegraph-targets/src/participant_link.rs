//! `LinkMessageParticipant` (`spec.md §4.6`): attach a raw participant
//! token from a specific message to an `Identifier`/`Target`, creating
//! either as needed.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use casegraph_store::{AuditLog, WriteGate};
use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::{CaseId, IdentifierId, MessageEventId, ParticipantLinkId, TargetId};
use casegraph_types::model::{IdentifierType, ParticipantRole};

use crate::conflict::{GlobalPersonConflictStrategy, IdentifierConflictStrategy};
use crate::identifier_ops::link_identifier;
use crate::normalize::{infer_identifier_type, normalize};
use crate::support::{audit, unwrap_conflict};

/// Outcome of [`link_message_participant`].
#[derive(Debug, Clone, Copy)]
pub struct ParticipantLinkOutcome {
    pub participant_link_id: ParticipantLinkId,
    pub identifier_id: IdentifierId,
    pub target_id: TargetId,
    pub target_created: bool,
}

/// Link `participant_raw` (the sender or a recipient of `message_event_id`)
/// to a target, inferring its [`IdentifierType`] unless `pinned_type` is
/// given. Creates a new target named `new_target_display_name` (falling
/// back to `participant_raw`) only when no target is already linked to the
/// resolved identifier.
#[allow(clippy::too_many_arguments)]
pub async fn link_message_participant(
    pool: &SqlitePool,
    gate: &WriteGate,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    message_event_id: MessageEventId,
    role: ParticipantRole,
    participant_raw: &str,
    pinned_type: Option<IdentifierType>,
    new_target_display_name: Option<&str>,
    source_type: &str,
    source_locator: &str,
    ingest_module_version: &str,
    operator: &str,
) -> Result<ParticipantLinkOutcome, CaseGraphError> {
    let participant_raw = participant_raw.trim();
    if participant_raw.is_empty() {
        return Err(CaseGraphError::InvalidArgument("participant token must not be empty".to_string()));
    }
    let identifier_type = pinned_type.unwrap_or_else(|| infer_identifier_type(participant_raw));
    let value_normalized = normalize(identifier_type, participant_raw)?;

    gate.run_write("TargetRegistry.linkMessageParticipant", || async {
        let mut tx = pool.begin().await?;

        let event_row = sqlx::query(r#"SELECT "CaseId" FROM "MessageEventRecord" WHERE "MessageEventId" = ?"#)
            .bind(message_event_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(event_row) = event_row else {
            return crate::support::abort(CaseGraphError::NotFound(format!("message event {message_event_id}")));
        };
        let case_id_str: String = event_row.get("CaseId");
        let case_id: CaseId = Uuid::parse_str(&case_id_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let existing_identifier = sqlx::query(
            r#"SELECT "IdentifierId" FROM "IdentifierRecord" WHERE "CaseId" = ? AND "Type" = ? AND "ValueNormalized" = ?"#,
        )
        .bind(case_id.to_string())
        .bind(identifier_type.to_string())
        .bind(&value_normalized)
        .fetch_optional(&mut *tx)
        .await?;

        let existing_link = match &existing_identifier {
            Some(row) => {
                let identifier_id: String = row.get("IdentifierId");
                sqlx::query(r#"SELECT "TargetId" FROM "TargetIdentifierLinkRecord" WHERE "IdentifierId" = ? LIMIT 1"#)
                    .bind(&identifier_id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            None => None,
        };

        let (target_id, target_created) = match existing_link {
            Some(row) => {
                let target_id: String = row.get("TargetId");
                (Uuid::parse_str(&target_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?, false)
            }
            None => {
                let display_name = new_target_display_name.unwrap_or(participant_raw);
                let target_id = Uuid::new_v4();
                sqlx::query(
                    r#"INSERT INTO "TargetRecord"
                       ("TargetId", "CaseId", "DisplayName", "PrimaryAlias", "Notes", "CreatedAtUtc", "UpdatedAtUtc",
                        "SourceType", "SourceLocator", "IngestModuleVersion", "GlobalEntityId")
                       VALUES (?, ?, ?, NULL, NULL, ?, ?, ?, ?, ?, NULL)"#,
                )
                .bind(target_id.to_string())
                .bind(case_id.to_string())
                .bind(display_name)
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .bind(source_type)
                .bind(source_locator)
                .bind(ingest_module_version)
                .execute(&mut *tx)
                .await?;

                audit(
                    &mut tx,
                    audit_log,
                    now,
                    operator,
                    "CreateTargetFromParticipant",
                    Some(case_id),
                    format!("Target \"{display_name}\" created from participant {participant_raw}."),
                    serde_json::json!({ "targetId": target_id, "displayName": display_name }),
                )
                .await?;

                (target_id, true)
            }
        };

        let link_outcome = link_identifier(
            &mut tx,
            audit_log,
            now,
            case_id,
            target_id,
            identifier_type,
            participant_raw,
            &value_normalized,
            target_created,
            IdentifierConflictStrategy::UseExistingTarget,
            GlobalPersonConflictStrategy::Cancel,
            source_type,
            source_locator,
            ingest_module_version,
            operator,
        )
        .await?;

        if link_outcome.link_created {
            audit(
                &mut tx,
                audit_log,
                now,
                operator,
                "LinkIdentifierToTarget",
                Some(case_id),
                format!("Identifier {} linked to target {target_id}.", link_outcome.identifier_id),
                serde_json::json!({ "identifierId": link_outcome.identifier_id, "targetId": target_id }),
            )
            .await?;
        }

        let participant_link_id = upsert_participant_link(
            &mut tx,
            case_id,
            message_event_id,
            role,
            participant_raw,
            link_outcome.identifier_id,
            link_outcome.effective_target_id,
        )
        .await?;

        audit(
            &mut tx,
            audit_log,
            now,
            operator,
            "ParticipantLinked",
            Some(case_id),
            format!("Participant \"{participant_raw}\" linked to target {}.", link_outcome.effective_target_id),
            serde_json::json!({
                "messageEventId": message_event_id,
                "role": role.to_string(),
                "targetId": link_outcome.effective_target_id,
            }),
        )
        .await?;

        tx.commit().await?;

        Ok(ParticipantLinkOutcome {
            participant_link_id,
            identifier_id: link_outcome.identifier_id,
            target_id: link_outcome.effective_target_id,
            target_created,
        })
    })
    .await
    .map_err(unwrap_conflict)
}

async fn upsert_participant_link(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    case_id: CaseId,
    message_event_id: MessageEventId,
    role: ParticipantRole,
    participant_raw: &str,
    identifier_id: IdentifierId,
    target_id: TargetId,
) -> Result<ParticipantLinkId, sqlx::Error> {
    let existing = sqlx::query(
        r#"SELECT "ParticipantLinkId" FROM "MessageParticipantLinkRecord"
           WHERE "MessageEventId" = ? AND "Role" = ? AND "ParticipantRaw" = ?"#,
    )
    .bind(message_event_id.to_string())
    .bind(role.to_string())
    .bind(participant_raw)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(row) = existing {
        let participant_link_id_str: String = row.get("ParticipantLinkId");
        let participant_link_id =
            Uuid::parse_str(&participant_link_id_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        sqlx::query(
            r#"UPDATE "MessageParticipantLinkRecord" SET "IdentifierId" = ?, "TargetId" = ? WHERE "ParticipantLinkId" = ?"#,
        )
        .bind(identifier_id.to_string())
        .bind(target_id.to_string())
        .bind(participant_link_id_str)
        .execute(&mut **tx)
        .await?;
        return Ok(participant_link_id);
    }

    let participant_link_id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO "MessageParticipantLinkRecord"
           ("ParticipantLinkId", "CaseId", "MessageEventId", "Role", "ParticipantRaw", "IdentifierId", "TargetId")
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(participant_link_id.to_string())
    .bind(case_id.to_string())
    .bind(message_event_id.to_string())
    .bind(role.to_string())
    .bind(participant_raw)
    .bind(identifier_id.to_string())
    .bind(target_id.to_string())
    .execute(&mut **tx)
    .await?;

    Ok(participant_link_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_store::{AuditLog, WriteGate};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn seeded_pool() -> (sqlx::SqlitePool, CaseId, MessageEventId) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        casegraph_store::schema::migrate(&pool).await.unwrap();

        let case_id = Uuid::new_v4();
        sqlx::query(r#"INSERT INTO "CaseRecord" ("CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc") VALUES (?, ?, ?, NULL)"#)
            .bind(case_id.to_string())
            .bind("Op Redwood")
            .bind(Utc::now().to_rfc3339())
            .execute(&pool)
            .await
            .unwrap();

        let thread_id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO "MessageThreadRecord"
               ("ThreadId", "CaseId", "EvidenceItemId", "Platform", "ThreadKey", "Title", "CreatedAtUtc", "SourceLocator", "IngestModuleVersion")
               VALUES (?, ?, ?, 'SMS', 'v1:test', NULL, ?, 'test:thread', 'test/1')"#,
        )
        .bind(thread_id.to_string())
        .bind(case_id.to_string())
        .bind(Uuid::new_v4().to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();

        let message_event_id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO "MessageEventRecord"
               ("MessageEventId", "ThreadId", "CaseId", "EvidenceItemId", "Platform", "TimestampUtc",
                "Direction", "Sender", "Recipients", "Body", "IsDeleted", "SourceLocator", "IngestModuleVersion")
               VALUES (?, ?, ?, ?, 'SMS', NULL, 'Incoming', '+15551234567', '+15557654321', 'hi', 0, 'test:event', 'test/1')"#,
        )
        .bind(message_event_id.to_string())
        .bind(thread_id.to_string())
        .bind(case_id.to_string())
        .bind(Uuid::new_v4().to_string())
        .execute(&pool)
        .await
        .unwrap();

        (pool, case_id, message_event_id)
    }

    #[tokio::test]
    async fn links_a_new_participant_to_a_freshly_created_target() {
        let (pool, _case_id, message_event_id) = seeded_pool().await;
        let gate = WriteGate::new(":memory:");
        let audit_log = AuditLog::new();

        let outcome = link_message_participant(
            &pool,
            &gate,
            &audit_log,
            Utc::now(),
            message_event_id,
            ParticipantRole::Sender,
            "+15551234567",
            None,
            None,
            "Ingest",
            "test:event",
            "casegraph-ingest/1",
            "tester",
        )
        .await
        .unwrap();

        assert!(outcome.target_created);

        let second = link_message_participant(
            &pool,
            &gate,
            &audit_log,
            Utc::now(),
            message_event_id,
            ParticipantRole::Recipient,
            "+15557654321",
            None,
            None,
            "Ingest",
            "test:event",
            "casegraph-ingest/1",
            "tester",
        )
        .await
        .unwrap();

        assert!(second.target_created);
        assert_ne!(second.target_id, outcome.target_id);
    }
}
