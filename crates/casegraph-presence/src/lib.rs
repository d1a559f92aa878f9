#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **casegraph-presence** – the Presence Index rebuild/refresh engine
//! (`spec.md §4.7`): a derived table mapping `(target, identifier,
//! message, role)`, reconstructed from `TargetIdentifierLinkRecord`,
//! `IdentifierRecord` and `MessageEventRecord` and never written to
//! directly by any other crate.

/// `Split(recipients, {,;|\n\r})`.
pub mod split;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use casegraph_store::WriteGate;
use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::{CaseId, EvidenceItemId, IdentifierId};
use casegraph_types::model::{IdentifierType, ParticipantRole};

use split::split_recipients;

/// Which subset of a case's presence rows to recompute
/// (`spec.md §4.7`, "Rebuild modes").
#[derive(Debug, Clone, Copy)]
pub enum RebuildScope {
    /// Every presence row for the case.
    Case(CaseId),
    /// Only rows derived from one evidence item's messages.
    Evidence(CaseId, EvidenceItemId),
    /// Only rows derived from one identifier's target links.
    Identifier(CaseId, IdentifierId),
}

/// Outcome of a [`rebuild`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildOutcome {
    /// Number of `TargetMessagePresenceRecord` rows inserted.
    pub rows_inserted: usize,
}

struct LinkRow {
    target_id: Uuid,
    identifier_id: Uuid,
    identifier_type: IdentifierType,
    value_normalized: String,
}

struct MessageRow {
    message_event_id: Uuid,
    evidence_item_id: Uuid,
    timestamp_utc: Option<DateTime<Utc>>,
    source_locator: String,
    sender: Option<String>,
    recipients: Option<String>,
}

/// Delete and recompute the presence rows in `scope`, in one transaction
/// under the Write Gate (`spec.md §4.7`, steps 1-4).
///
/// Idempotent: rebuilding the same scope twice against unchanged inputs
/// produces the same set of `(case_id, target_id, message_event_id,
/// matched_identifier_id, role)` tuples (`spec.md §8`).
pub async fn rebuild(pool: &SqlitePool, gate: &WriteGate, now: DateTime<Utc>, scope: RebuildScope) -> Result<RebuildOutcome, CaseGraphError> {
    gate.run_write("PresenceIndex.rebuild", || async {
        let mut tx = pool.begin().await?;

        delete_scope(&mut tx, scope).await?;
        let links = load_links(&mut tx, scope).await?;
        let messages = load_messages(&mut tx, scope).await?;

        let case_id = match scope {
            RebuildScope::Case(id) | RebuildScope::Evidence(id, _) | RebuildScope::Identifier(id, _) => id,
        };

        let mut rows_inserted = 0usize;
        for link in &links {
            for message in &messages {
                for role in matched_roles(link, message) {
                    sqlx::query(
                        r#"INSERT INTO "TargetMessagePresenceRecord"
                           ("PresenceId", "CaseId", "TargetId", "MessageEventId", "MatchedIdentifierId", "Role",
                            "EvidenceItemId", "SourceLocator", "MessageTimestampUtc", "FirstSeenUtc", "LastSeenUtc")
                           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                    )
                    .bind(Uuid::new_v4().to_string())
                    .bind(case_id.to_string())
                    .bind(link.target_id.to_string())
                    .bind(message.message_event_id.to_string())
                    .bind(link.identifier_id.to_string())
                    .bind(role.to_string())
                    .bind(message.evidence_item_id.to_string())
                    .bind(&message.source_locator)
                    .bind(message.timestamp_utc.map(|t| t.to_rfc3339()))
                    .bind(now.to_rfc3339())
                    .bind(now.to_rfc3339())
                    .execute(&mut *tx)
                    .await?;
                    rows_inserted += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(RebuildOutcome { rows_inserted })
    })
    .await
}

/// Which role(s) (`Sender`, `Recipient`, both, or neither) `link`'s
/// identifier matched on `message` (`spec.md §4.7`, step 4).
fn matched_roles(link: &LinkRow, message: &MessageRow) -> Vec<ParticipantRole> {
    let mut roles = Vec::with_capacity(2);

    if let Some(sender) = message.sender.as_deref() {
        if casegraph_targets::normalize_identifier(link.identifier_type, sender)
            .map(|normalized| normalized == link.value_normalized)
            .unwrap_or(false)
        {
            roles.push(ParticipantRole::Sender);
        }
    }

    if let Some(recipients) = message.recipients.as_deref() {
        let is_recipient = split_recipients(recipients).into_iter().any(|token| {
            casegraph_targets::normalize_identifier(link.identifier_type, token)
                .map(|normalized| normalized == link.value_normalized)
                .unwrap_or(false)
        });
        if is_recipient {
            roles.push(ParticipantRole::Recipient);
        }
    }

    roles
}

async fn delete_scope(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, scope: RebuildScope) -> Result<(), sqlx::Error> {
    match scope {
        RebuildScope::Case(case_id) => {
            sqlx::query(r#"DELETE FROM "TargetMessagePresenceRecord" WHERE "CaseId" = ?"#)
                .bind(case_id.to_string())
                .execute(&mut **tx)
                .await?;
        }
        RebuildScope::Evidence(_, evidence_item_id) => {
            sqlx::query(r#"DELETE FROM "TargetMessagePresenceRecord" WHERE "EvidenceItemId" = ?"#)
                .bind(evidence_item_id.to_string())
                .execute(&mut **tx)
                .await?;
        }
        RebuildScope::Identifier(_, identifier_id) => {
            sqlx::query(r#"DELETE FROM "TargetMessagePresenceRecord" WHERE "MatchedIdentifierId" = ?"#)
                .bind(identifier_id.to_string())
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}

async fn load_links(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, scope: RebuildScope) -> Result<Vec<LinkRow>, sqlx::Error> {
    let rows = match scope {
        RebuildScope::Case(case_id) | RebuildScope::Evidence(case_id, _) => {
            sqlx::query(
                r#"SELECT l."TargetId" AS "TargetId", i."IdentifierId" AS "IdentifierId",
                          i."Type" AS "Type", i."ValueNormalized" AS "ValueNormalized"
                   FROM "TargetIdentifierLinkRecord" l
                   JOIN "IdentifierRecord" i ON i."IdentifierId" = l."IdentifierId"
                   WHERE l."CaseId" = ?"#,
            )
            .bind(case_id.to_string())
            .fetch_all(&mut **tx)
            .await?
        }
        RebuildScope::Identifier(_, identifier_id) => {
            sqlx::query(
                r#"SELECT l."TargetId" AS "TargetId", i."IdentifierId" AS "IdentifierId",
                          i."Type" AS "Type", i."ValueNormalized" AS "ValueNormalized"
                   FROM "TargetIdentifierLinkRecord" l
                   JOIN "IdentifierRecord" i ON i."IdentifierId" = l."IdentifierId"
                   WHERE l."IdentifierId" = ?"#,
            )
            .bind(identifier_id.to_string())
            .fetch_all(&mut **tx)
            .await?
        }
    };

    rows.into_iter()
        .map(|row| {
            let target_id: String = row.get("TargetId");
            let identifier_id: String = row.get("IdentifierId");
            let identifier_type: String = row.get("Type");
            let value_normalized: String = row.get("ValueNormalized");
            Ok(LinkRow {
                target_id: Uuid::parse_str(&target_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                identifier_id: Uuid::parse_str(&identifier_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                identifier_type: identifier_type.parse().map_err(|e: CaseGraphError| sqlx::Error::Decode(Box::new(e)))?,
                value_normalized,
            })
        })
        .collect()
}

async fn load_messages(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, scope: RebuildScope) -> Result<Vec<MessageRow>, sqlx::Error> {
    let rows = match scope {
        RebuildScope::Case(case_id) | RebuildScope::Identifier(case_id, _) => {
            sqlx::query(
                r#"SELECT "MessageEventId", "EvidenceItemId", "TimestampUtc", "SourceLocator", "Sender", "Recipients"
                   FROM "MessageEventRecord" WHERE "CaseId" = ?"#,
            )
            .bind(case_id.to_string())
            .fetch_all(&mut **tx)
            .await?
        }
        RebuildScope::Evidence(_, evidence_item_id) => {
            sqlx::query(
                r#"SELECT "MessageEventId", "EvidenceItemId", "TimestampUtc", "SourceLocator", "Sender", "Recipients"
                   FROM "MessageEventRecord" WHERE "EvidenceItemId" = ?"#,
            )
            .bind(evidence_item_id.to_string())
            .fetch_all(&mut **tx)
            .await?
        }
    };

    rows.into_iter()
        .map(|row| {
            let message_event_id: String = row.get("MessageEventId");
            let evidence_item_id: String = row.get("EvidenceItemId");
            let timestamp_utc: Option<String> = row.get("TimestampUtc");
            Ok(MessageRow {
                message_event_id: Uuid::parse_str(&message_event_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                evidence_item_id: Uuid::parse_str(&evidence_item_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                timestamp_utc: timestamp_utc
                    .map(|t| DateTime::parse_from_rfc3339(&t).map(|t| t.with_timezone(&Utc)))
                    .transpose()
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                source_locator: row.get("SourceLocator"),
                sender: row.get("Sender"),
                recipients: row.get("Recipients"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_store::AuditLog;
    use casegraph_types::model::IdentifierType;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        casegraph_store::schema::migrate(&pool).await.unwrap();
        pool
    }

    async fn seed_case(pool: &SqlitePool, case_id: Uuid) {
        sqlx::query(r#"INSERT INTO "CaseRecord" ("CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc") VALUES (?, ?, ?, NULL)"#)
            .bind(case_id.to_string())
            .bind("Op Redwood")
            .bind(Utc::now().to_rfc3339())
            .execute(pool)
            .await
            .unwrap();
    }

    async fn insert_message(pool: &SqlitePool, case_id: Uuid, evidence_item_id: Uuid, thread_id: Uuid, sender: &str, recipients: &str) -> Uuid {
        sqlx::query(
            r#"INSERT INTO "MessageThreadRecord" ("ThreadId","CaseId","EvidenceItemId","Platform","ThreadKey","Title","CreatedAtUtc","SourceLocator","IngestModuleVersion")
               VALUES (?, ?, ?, 'SMS', 'key', NULL, ?, 'loc', 'test/1')"#,
        )
        .bind(thread_id.to_string())
        .bind(case_id.to_string())
        .bind(evidence_item_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .unwrap();

        let message_event_id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO "MessageEventRecord"
               ("MessageEventId","ThreadId","CaseId","EvidenceItemId","Platform","TimestampUtc","Direction","Sender","Recipients","Body","IsDeleted","SourceLocator","IngestModuleVersion")
               VALUES (?, ?, ?, ?, 'SMS', ?, 'Incoming', ?, ?, 'hi', 0, ?, 'test/1')"#,
        )
        .bind(message_event_id.to_string())
        .bind(thread_id.to_string())
        .bind(case_id.to_string())
        .bind(evidence_item_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(sender)
        .bind(recipients)
        .bind(format!("xlsx:f#S:R{message_event_id}"))
        .execute(pool)
        .await
        .unwrap();
        message_event_id
    }

    #[tokio::test]
    async fn matches_sender_and_recipient_and_is_idempotent() {
        let pool = memory_pool().await;
        let gate = WriteGate::new(":memory:");
        let audit_log = AuditLog::new();
        let case_id = Uuid::new_v4();
        seed_case(&pool, case_id).await;
        let now = Utc::now();

        let target = casegraph_targets::create_target(
            &pool, &gate, &audit_log, now, case_id, "Alice", None,
            casegraph_targets::GlobalPersonLink::None, "Manual", "manual:create", "casegraph-targets/1", "tester",
        ).await.unwrap();
        casegraph_targets::add_identifier(
            &pool, &gate, &audit_log, now, case_id, target.target_id, IdentifierType::Phone, "+15551234567", true,
            casegraph_targets::IdentifierConflictStrategy::Cancel, casegraph_targets::GlobalPersonConflictStrategy::Cancel,
            "Manual", "manual:add", "casegraph-targets/1", "tester",
        ).await.unwrap();

        let evidence_item_id = Uuid::new_v4();
        insert_message(&pool, case_id, evidence_item_id, Uuid::new_v4(), "+15551234567", "+15557654321").await;
        insert_message(&pool, case_id, evidence_item_id, Uuid::new_v4(), "+15557654321", "+1 555 123 4567, someone@else.com").await;

        let outcome_a = rebuild(&pool, &gate, now, RebuildScope::Case(case_id)).await.unwrap();
        assert_eq!(outcome_a.rows_inserted, 2);

        let outcome_b = rebuild(&pool, &gate, now, RebuildScope::Case(case_id)).await.unwrap();
        assert_eq!(outcome_b.rows_inserted, 2);

        let row_count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "TargetMessagePresenceRecord""#)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row_count, 2);
    }
}
