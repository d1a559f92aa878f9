#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **casegraph-search** – keyword/structured Search plus target presence
//! summaries (`spec.md §4.8`). Entirely read-only: no write-gate
//! involvement, since nothing here mutates the store.

/// `SearchRequest` and the `PrepareRequest` normalization step.
pub mod request;
/// `SearchHit` and snippet helpers.
pub mod result;
/// `Search(request)`: the FTS path, LIKE fallback, and keywordless path.
pub mod search;
/// `GetTargetPresenceSummary`.
pub mod presence_summary;

pub use presence_summary::{get_target_presence_summary, IdentifierPresenceSummary, TargetPresenceSummary};
pub use request::SearchRequest;
pub use result::SearchHit;
pub use search::search;

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_types::ids::CaseId;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use uuid::Uuid;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        casegraph_store::schema::migrate(&pool).await.unwrap();
        pool
    }

    async fn seed_message(pool: &SqlitePool, case_id: CaseId, body: &str) -> Uuid {
        let evidence_item_id = Uuid::new_v4();
        let thread_id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(r#"INSERT INTO "CaseRecord" ("CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc") VALUES (?, ?, ?, NULL)"#)
            .bind(case_id.to_string())
            .bind("Op Redwood")
            .bind(now.to_rfc3339())
            .execute(pool)
            .await
            .ok();
        sqlx::query(
            r#"INSERT INTO "MessageThreadRecord" ("ThreadId","CaseId","EvidenceItemId","Platform","ThreadKey","Title","CreatedAtUtc","SourceLocator","IngestModuleVersion")
               VALUES (?, ?, ?, 'SMS', 'key', NULL, ?, 'loc', 'test/1')"#,
        )
        .bind(thread_id.to_string())
        .bind(case_id.to_string())
        .bind(evidence_item_id.to_string())
        .bind(now.to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
        let message_event_id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO "MessageEventRecord"
               ("MessageEventId","ThreadId","CaseId","EvidenceItemId","Platform","TimestampUtc","Direction","Sender","Recipients","Body","IsDeleted","SourceLocator","IngestModuleVersion")
               VALUES (?, ?, ?, ?, 'SMS', ?, 'Incoming', '+15551234567', '+15557654321', ?, 0, ?, 'test/1')"#,
        )
        .bind(message_event_id.to_string())
        .bind(thread_id.to_string())
        .bind(case_id.to_string())
        .bind(evidence_item_id.to_string())
        .bind(now.to_rfc3339())
        .bind(body)
        .bind(format!("xlsx:f#S:R{message_event_id}"))
        .execute(pool)
        .await
        .unwrap();
        message_event_id
    }

    #[tokio::test]
    async fn empty_request_returns_empty_without_querying() {
        let pool = memory_pool().await;
        let case_id = Uuid::new_v4();
        let hits = search(&pool, case_id, &SearchRequest::default()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn finds_message_by_keyword() {
        let pool = memory_pool().await;
        let case_id = Uuid::new_v4();
        seed_message(&pool, case_id, "hello world, how are you").await;

        let request = SearchRequest {
            query: Some("hello".to_string()),
            take: 10,
            ..Default::default()
        };
        let hits = search(&pool, case_id, &request).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("hello") || hits[0].snippet.contains("[hello]"));
    }

    #[tokio::test]
    async fn keywordless_path_honors_platform_filter() {
        let pool = memory_pool().await;
        let case_id = Uuid::new_v4();
        seed_message(&pool, case_id, "no keyword here").await;

        let request = SearchRequest {
            platform_filter: Some("SMS".to_string()),
            take: 10,
            ..Default::default()
        };
        let hits = search(&pool, case_id, &request).await.unwrap();
        assert_eq!(hits.len(), 1);

        let request_other_platform = SearchRequest {
            platform_filter: Some("WhatsApp".to_string()),
            take: 10,
            ..Default::default()
        };
        let hits = search(&pool, case_id, &request_other_platform).await.unwrap();
        assert!(hits.is_empty());
    }
}
