//! `Search(request)` (`spec.md §4.8`): the FTS path, its LIKE-path
//! fallback, and the keywordless path that shares the LIKE path's query
//! shape minus the keyword predicate.

use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::CaseId;
use casegraph_types::model::{Direction, Platform};

use crate::request::{prepare, PreparedRequest, SearchRequest};
use crate::result::{truncated_snippet, SearchHit};

/// Run `request` against `case_id`: the FTS path when a keyword is given,
/// falling back to the LIKE path on any FTS error; the keywordless path
/// when structured filters alone are sufficient; an empty result when
/// nothing was asked for at all.
pub async fn search(pool: &SqlitePool, case_id: CaseId, request: &SearchRequest) -> Result<Vec<SearchHit>, CaseGraphError> {
    let prepared = prepare(case_id, request);
    if prepared.is_empty_request() {
        return Ok(Vec::new());
    }

    let rows = match prepared.query.as_deref() {
        Some(query) => match fts_search(pool, &prepared, query).await {
            Ok(rows) => rows,
            Err(error) => {
                warn!(%error, "FTS search failed; falling back to LIKE path");
                like_search(pool, &prepared).await.map_err(anyhow::Error::from)?
            }
        },
        None => like_search(pool, &prepared).await.map_err(anyhow::Error::from)?,
    };

    let start = prepared.skip as usize;
    Ok(rows.into_iter().skip(start).take(prepared.take as usize).collect())
}

async fn fts_search(pool: &SqlitePool, prepared: &PreparedRequest, query: &str) -> Result<Vec<SearchHit>, sqlx::Error> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"SELECT m."MessageEventId", m."ThreadId", m."CaseId", m."EvidenceItemId", m."Platform",
                  m."TimestampUtc", m."Direction", m."Sender", m."Recipients", m."IsDeleted", m."SourceLocator",
                  snippet(f, 5, '[', ']', '...', 14) AS "Snippet"
           FROM "MessageEventFts" f
           JOIN "MessageEventRecord" m ON m."MessageEventId" = f."MessageEventId"
           WHERE f MATCH "#,
    );
    qb.push_bind(query.to_string());
    qb.push(r#" AND m."CaseId" = "#);
    qb.push_bind(prepared.case_id.to_string());
    push_structured_filters(&mut qb, prepared);
    qb.push(r#" ORDER BY bm25(f) ASC, m."TimestampUtc" DESC LIMIT "#);
    qb.push_bind(prepared.max_rows);

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(|row| row_to_hit(row, |row| row.try_get("Snippet"))).collect()
}

async fn like_search(pool: &SqlitePool, prepared: &PreparedRequest) -> Result<Vec<SearchHit>, sqlx::Error> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"SELECT m."MessageEventId", m."ThreadId", m."CaseId", m."EvidenceItemId", m."Platform",
                  m."TimestampUtc", m."Direction", m."Sender", m."Recipients", m."IsDeleted", m."SourceLocator", m."Body"
           FROM "MessageEventRecord" m
           WHERE m."CaseId" = "#,
    );
    qb.push_bind(prepared.case_id.to_string());

    if let Some(query) = &prepared.query {
        let pattern = format!("%{}%", query.to_ascii_lowercase());
        qb.push(r#" AND (LOWER(coalesce(m."Body", '')) LIKE "#);
        qb.push_bind(pattern.clone());
        qb.push(r#" OR LOWER(coalesce(m."Sender", '')) LIKE "#);
        qb.push_bind(pattern.clone());
        qb.push(r#" OR LOWER(coalesce(m."Recipients", '')) LIKE "#);
        qb.push_bind(pattern);
        qb.push(")");
    }
    push_structured_filters(&mut qb, prepared);
    qb.push(r#" ORDER BY m."TimestampUtc" DESC LIMIT "#);
    qb.push_bind(prepared.max_rows);

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter()
        .map(|row| row_to_hit(row, |row| Ok(truncated_snippet(row.try_get::<Option<String>, _>("Body")?.as_deref()))))
        .collect()
}

fn push_structured_filters(qb: &mut QueryBuilder<Sqlite>, prepared: &PreparedRequest) {
    if let Some(platform) = &prepared.platform {
        qb.push(r#" AND LOWER(m."Platform") = "#);
        qb.push_bind(platform.clone());
    }
    if let Some(from) = prepared.date_from_utc {
        qb.push(r#" AND m."TimestampUtc" >= "#);
        qb.push_bind(from.to_rfc3339());
    }
    if let Some(to) = prepared.date_to_utc {
        qb.push(r#" AND m."TimestampUtc" <= "#);
        qb.push_bind(to.to_rfc3339());
    }
    if let Some(direction) = prepared.direction {
        qb.push(r#" AND m."Direction" = "#);
        qb.push_bind(direction.to_string());
    }
    if let Some(target_id) = prepared.target_id_filter {
        qb.push(
            r#" AND EXISTS (
                  SELECT 1 FROM "MessageParticipantLinkRecord" pl
                  JOIN "IdentifierRecord" i ON i."IdentifierId" = pl."IdentifierId"
                  WHERE pl."MessageEventId" = m."MessageEventId" AND pl."TargetId" = "#,
        );
        qb.push_bind(target_id.to_string());
        if let Some(identifier_type) = prepared.identifier_type_filter {
            qb.push(r#" AND i."Type" = "#);
            qb.push_bind(identifier_type.to_string());
        }
        qb.push(")");
    }
}

fn row_to_hit(row: &sqlx::sqlite::SqliteRow, snippet: impl FnOnce(&sqlx::sqlite::SqliteRow) -> Result<String, sqlx::Error>) -> Result<SearchHit, sqlx::Error> {
    let message_event_id: String = row.try_get("MessageEventId")?;
    let thread_id: String = row.try_get("ThreadId")?;
    let case_id: String = row.try_get("CaseId")?;
    let evidence_item_id: String = row.try_get("EvidenceItemId")?;
    let platform: String = row.try_get("Platform")?;
    let timestamp_utc: Option<String> = row.try_get("TimestampUtc")?;
    let direction: String = row.try_get("Direction")?;

    Ok(SearchHit {
        message_event_id: parse_uuid(&message_event_id)?,
        thread_id: parse_uuid(&thread_id)?,
        case_id: parse_uuid(&case_id)?,
        evidence_item_id: parse_uuid(&evidence_item_id)?,
        platform: platform.parse::<Platform>().map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        timestamp_utc: timestamp_utc
            .map(|t| chrono::DateTime::parse_from_rfc3339(&t).map(|t| t.with_timezone(&chrono::Utc)))
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        direction: direction.parse::<Direction>().map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        sender: row.try_get("Sender")?,
        recipients: row.try_get("Recipients")?,
        is_deleted: row.try_get("IsDeleted")?,
        source_locator: row.try_get("SourceLocator")?,
        snippet: snippet(row)?,
    })
}

fn parse_uuid(value: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
