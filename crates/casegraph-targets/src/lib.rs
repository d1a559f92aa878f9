#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **casegraph-targets** – the Target Registry: targets, aliases,
//! identifiers, message-participant linking, and the cross-case
//! global-person registry (`spec.md §4.6`).

/// Identifier normalization and type inference.
pub mod normalize;
/// Conflict-resolution strategy enums.
pub mod conflict;
/// Shared audit/error-propagation plumbing.
mod support;
/// `CreateTarget`, `UpdateTarget`, `AddAlias`, `RemoveAlias`.
pub mod target_ops;
/// `AddIdentifier`, `UpdateIdentifier`, `RemoveIdentifier`, global-person
/// sync.
pub mod identifier_ops;
/// `LinkMessageParticipant`.
pub mod participant_link;

pub use conflict::{GlobalPersonConflictStrategy, IdentifierConflictStrategy};
pub use identifier_ops::{add_identifier, remove_identifier, update_identifier, IdentifierLinkOutcome};
pub use normalize::{infer_identifier_type, normalize as normalize_identifier};
pub use participant_link::{link_message_participant, ParticipantLinkOutcome};
pub use target_ops::{add_alias, create_target, remove_alias, update_target, GlobalPersonLink};

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_store::{AuditLog, WriteGate};
    use casegraph_types::model::IdentifierType;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use uuid::Uuid;

    async fn memory_pool() -> sqlx::SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        casegraph_store::schema::migrate(&pool).await.unwrap();
        pool
    }

    async fn seed_case(pool: &sqlx::SqlitePool, case_id: Uuid) {
        sqlx::query(r#"INSERT INTO "CaseRecord" ("CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc") VALUES (?, ?, ?, NULL)"#)
            .bind(case_id.to_string())
            .bind("Op Redwood")
            .bind(Utc::now().to_rfc3339())
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_target_then_add_identifier_links_once() {
        let pool = memory_pool().await;
        let gate = WriteGate::new(":memory:");
        let audit_log = AuditLog::new();
        let case_id = Uuid::new_v4();
        seed_case(&pool, case_id).await;
        let now = Utc::now();

        let target = create_target(
            &pool,
            &gate,
            &audit_log,
            now,
            case_id,
            "John Doe",
            None,
            GlobalPersonLink::None,
            "Manual",
            "manual:create",
            "casegraph-targets/1",
            "tester",
        )
        .await
        .unwrap();

        let outcome = add_identifier(
            &pool,
            &gate,
            &audit_log,
            now,
            case_id,
            target.target_id,
            IdentifierType::Phone,
            "+1 (555) 123-4567",
            true,
            IdentifierConflictStrategy::Cancel,
            GlobalPersonConflictStrategy::Cancel,
            "Manual",
            "manual:add-identifier",
            "casegraph-targets/1",
            "tester",
        )
        .await
        .unwrap();

        assert_eq!(outcome.effective_target_id, target.target_id);
        assert!(outcome.link_created);

        let row_count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "TargetIdentifierLinkRecord""#)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row_count, 1);
    }

    #[tokio::test]
    async fn conflicting_identifier_cancels_by_default() {
        let pool = memory_pool().await;
        let gate = WriteGate::new(":memory:");
        let audit_log = AuditLog::new();
        let case_id = Uuid::new_v4();
        seed_case(&pool, case_id).await;
        let now = Utc::now();

        let target_a = create_target(
            &pool, &gate, &audit_log, now, case_id, "Alpha", None, GlobalPersonLink::None,
            "Manual", "manual:a", "casegraph-targets/1", "tester",
        ).await.unwrap();
        let target_b = create_target(
            &pool, &gate, &audit_log, now, case_id, "Beta", None, GlobalPersonLink::None,
            "Manual", "manual:b", "casegraph-targets/1", "tester",
        ).await.unwrap();

        add_identifier(
            &pool, &gate, &audit_log, now, case_id, target_a.target_id, IdentifierType::Email,
            "shared@example.com", true, IdentifierConflictStrategy::Cancel, GlobalPersonConflictStrategy::Cancel,
            "Manual", "manual:add", "casegraph-targets/1", "tester",
        ).await.unwrap();

        let result = add_identifier(
            &pool, &gate, &audit_log, now, case_id, target_b.target_id, IdentifierType::Email,
            "shared@example.com", true, IdentifierConflictStrategy::Cancel, GlobalPersonConflictStrategy::Cancel,
            "Manual", "manual:add", "casegraph-targets/1", "tester",
        ).await;

        assert!(matches!(result, Err(casegraph_types::error::CaseGraphError::IdentifierConflict { .. })));
    }

    #[tokio::test]
    async fn move_identifier_to_requested_target_relinks_single_row() {
        let pool = memory_pool().await;
        let gate = WriteGate::new(":memory:");
        let audit_log = AuditLog::new();
        let case_id = Uuid::new_v4();
        seed_case(&pool, case_id).await;
        let now = Utc::now();

        let t1 = create_target(
            &pool, &gate, &audit_log, now, case_id, "T1", None, GlobalPersonLink::None,
            "Manual", "manual:t1", "casegraph-targets/1", "tester",
        ).await.unwrap();
        let t2 = create_target(
            &pool, &gate, &audit_log, now, case_id, "T2", None, GlobalPersonLink::None,
            "Manual", "manual:t2", "casegraph-targets/1", "tester",
        ).await.unwrap();

        add_identifier(
            &pool, &gate, &audit_log, now, case_id, t1.target_id, IdentifierType::Email,
            "ALICE@Example.com", false, IdentifierConflictStrategy::Cancel, GlobalPersonConflictStrategy::Cancel,
            "Manual", "manual:add1", "casegraph-targets/1", "tester",
        ).await.unwrap();

        let outcome = add_identifier(
            &pool, &gate, &audit_log, now, case_id, t2.target_id, IdentifierType::Email,
            "alice@example.com", false, IdentifierConflictStrategy::MoveIdentifierToRequestedTarget,
            GlobalPersonConflictStrategy::Cancel,
            "Manual", "manual:add2", "casegraph-targets/1", "tester",
        ).await.unwrap();

        assert_eq!(outcome.effective_target_id, t2.target_id);

        let identifier_rows: Vec<(String, String)> =
            sqlx::query_as(r#"SELECT "Type", "ValueNormalized" FROM "IdentifierRecord" WHERE "CaseId" = ?"#)
                .bind(case_id.to_string())
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(identifier_rows.len(), 1);
        assert_eq!(identifier_rows[0].1, "alice@example.com");

        let link_target: String =
            sqlx::query_scalar(r#"SELECT "TargetId" FROM "TargetIdentifierLinkRecord" WHERE "CaseId" = ?"#)
                .bind(case_id.to_string())
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(link_target, t2.target_id.to_string());

        let audit_types: Vec<String> = sqlx::query_scalar(
            r#"SELECT "ActionType" FROM "AuditEventRecord" WHERE "CaseId" = ? ORDER BY "TimestampUtc""#,
        )
        .bind(case_id.to_string())
        .fetch_all(&pool)
        .await
        .unwrap();
        assert!(audit_types.contains(&"IdentifierUnlinkedFromTarget".to_string()));
        assert!(audit_types.contains(&"IdentifierLinkedToTarget".to_string()));
    }
}
