//! Append-only audit log with a live broadcast tail (`spec.md §4.1`, §5).
//!
//! Every write the store performs on behalf of a higher-level operation is
//! expected to append exactly one [`AuditEvent`] row in the same
//! transaction; this module only owns the row shape, the insert, and the
//! live subscription — callers decide what `action_type`/`summary` to use.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

use casegraph_types::model::AuditEvent;

/// Capacity of the live audit tail broadcast channel. Slow subscribers that
/// fall behind by more than this many events will observe a lagged receiver
/// error rather than unbounded memory growth.
const AUDIT_BROADCAST_CAPACITY: usize = 1024;

/// Appends rows to `AuditEventRecord` and republishes each one to live
/// subscribers (e.g. a UI audit tail view). Cheap to clone: every clone
/// shares the same underlying broadcast channel.
#[derive(Clone)]
pub struct AuditLog {
    tx: broadcast::Sender<AuditEvent>,
}

impl AuditLog {
    /// Create a new, unsubscribed audit log publisher.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(AUDIT_BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to a live feed of appended audit events. Lagging
    /// subscribers will see [`broadcast::error::RecvError::Lagged`] rather
    /// than block publishers.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }

    /// Append one audit row within an existing transaction and publish it
    /// to subscribers. Callers are responsible for committing the
    /// transaction this executes against.
    pub async fn append(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        event: AuditEvent,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO "AuditEventRecord"
               ("AuditEventId", "TimestampUtc", "Operator", "ActionType", "CaseId", "EvidenceItemId", "Summary", "JsonPayload")
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.audit_event_id.to_string())
        .bind(event.timestamp_utc.to_rfc3339())
        .bind(&event.operator)
        .bind(&event.action_type)
        .bind(event.case_id.map(|id| id.to_string()))
        .bind(event.evidence_item_id.map(|id| id.to_string()))
        .bind(&event.summary)
        .bind(event.json_payload.to_string())
        .execute(&mut **tx)
        .await?;

        // A subscriber count of zero means `send` errors; that is not a
        // failure of the append itself, so it is ignored.
        let _ = self.tx.send(event);
        Ok(())
    }

    /// Fetch the most recent audit rows for a case, newest first, for the
    /// initial page of an audit tail view before it starts following
    /// [`AuditLog::subscribe`].
    pub async fn recent_for_case(
        &self,
        pool: &SqlitePool,
        case_id: Uuid,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"SELECT "AuditEventId", "TimestampUtc", "Operator", "ActionType", "CaseId", "EvidenceItemId", "Summary", "JsonPayload"
               FROM "AuditEventRecord"
               WHERE "CaseId" = ?
               ORDER BY "TimestampUtc" DESC
               LIMIT ?"#,
        )
        .bind(case_id.to_string())
        .bind(limit)
        .fetch_all(pool)
        .await?;

        rows.iter().map(row_to_audit_event).collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

fn row_to_audit_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, sqlx::Error> {
    let audit_event_id: String = row.try_get("AuditEventId")?;
    let timestamp_utc: String = row.try_get("TimestampUtc")?;
    let case_id: Option<String> = row.try_get("CaseId")?;
    let evidence_item_id: Option<String> = row.try_get("EvidenceItemId")?;
    let json_payload: String = row.try_get("JsonPayload")?;

    Ok(AuditEvent {
        audit_event_id: parse_uuid(&audit_event_id)?,
        timestamp_utc: parse_timestamp(&timestamp_utc)?,
        operator: row.try_get("Operator")?,
        action_type: row.try_get("ActionType")?,
        case_id: case_id.map(|s| parse_uuid(&s)).transpose()?,
        evidence_item_id: evidence_item_id.map(|s| parse_uuid(&s)).transpose()?,
        summary: row.try_get("Summary")?,
        json_payload: serde_json::from_str::<Value>(&json_payload)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(s).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_types::model::AuditEvent;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::schema::migrate(&pool).await.unwrap();
        pool
    }

    fn sample_event(op: &str) -> AuditEvent {
        AuditEvent {
            audit_event_id: Uuid::new_v4(),
            timestamp_utc: Utc::now(),
            operator: "tester".to_string(),
            action_type: op.to_string(),
            case_id: None,
            evidence_item_id: None,
            summary: "a test audit row".to_string(),
            json_payload: serde_json::json!({ "op": op }),
        }
    }

    #[tokio::test]
    async fn append_publishes_to_subscribers() {
        let pool = memory_pool().await;
        let log = AuditLog::new();
        let mut rx = log.subscribe();

        let event = sample_event("TestAction");
        let mut tx = pool.begin().await.unwrap();
        log.append(&mut tx, event.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.audit_event_id, event.audit_event_id);
    }

    #[tokio::test]
    async fn recent_for_case_orders_newest_first() {
        let pool = memory_pool().await;
        let log = AuditLog::new();
        let case_id = Uuid::new_v4();

        for i in 0..3 {
            let mut event = sample_event("TestAction");
            event.case_id = Some(case_id);
            event.timestamp_utc = Utc::now() + chrono::Duration::seconds(i);
            let mut tx = pool.begin().await.unwrap();
            log.append(&mut tx, event).await.unwrap();
            tx.commit().await.unwrap();
        }

        let rows = log.recent_for_case(&pool, case_id, 10).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].timestamp_utc >= rows[1].timestamp_utc);
        assert!(rows[1].timestamp_utc >= rows[2].timestamp_utc);
    }
}
