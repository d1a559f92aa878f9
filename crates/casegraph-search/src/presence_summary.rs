//! `GetTargetPresenceSummary(caseId, targetId, …)` (`spec.md §4.8`).

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::{CaseId, IdentifierId, TargetId};
use casegraph_types::model::IdentifierType;

/// Per-identifier match counts within a [`TargetPresenceSummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierPresenceSummary {
    pub identifier_id: IdentifierId,
    pub identifier_type: IdentifierType,
    pub value_raw: String,
    pub match_count: i64,
    pub last_seen_utc: Option<DateTime<Utc>>,
}

/// One target's presence, broken down per linked identifier plus totals.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPresenceSummary {
    pub target_id: TargetId,
    pub identifiers: Vec<IdentifierPresenceSummary>,
    pub total_match_count: i64,
    pub total_last_seen_utc: Option<DateTime<Utc>>,
}

/// Summarize `target_id`'s presence within `case_id`, restricted by an
/// optional identifier type and an optional `[date_from, date_to]` window
/// on `MessageTimestampUtc`.
pub async fn get_target_presence_summary(
    pool: &SqlitePool,
    case_id: CaseId,
    target_id: TargetId,
    identifier_type_filter: Option<IdentifierType>,
    date_from_utc: Option<DateTime<Utc>>,
    date_to_utc: Option<DateTime<Utc>>,
) -> Result<TargetPresenceSummary, CaseGraphError> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"SELECT i."IdentifierId", i."Type", i."ValueRaw",
                  COUNT(p."PresenceId") AS "MatchCount",
                  MAX(p."LastSeenUtc") AS "LastSeenUtc"
           FROM "TargetIdentifierLinkRecord" l
           JOIN "IdentifierRecord" i ON i."IdentifierId" = l."IdentifierId"
           LEFT JOIN "TargetMessagePresenceRecord" p
             ON p."MatchedIdentifierId" = i."IdentifierId" AND p."TargetId" = l."TargetId""#,
    );
    if let Some(from) = date_from_utc {
        qb.push(r#" AND p."MessageTimestampUtc" >= "#);
        qb.push_bind(from.to_rfc3339());
    }
    if let Some(to) = date_to_utc {
        qb.push(r#" AND p."MessageTimestampUtc" <= "#);
        qb.push_bind(to.to_rfc3339());
    }
    qb.push(r#" WHERE l."CaseId" = "#);
    qb.push_bind(case_id.to_string());
    qb.push(r#" AND l."TargetId" = "#);
    qb.push_bind(target_id.to_string());
    if let Some(identifier_type) = identifier_type_filter {
        qb.push(r#" AND i."Type" = "#);
        qb.push_bind(identifier_type.to_string());
    }
    qb.push(r#" GROUP BY i."IdentifierId" ORDER BY i."IdentifierId""#);

    let rows = qb.build().fetch_all(pool).await.map_err(anyhow::Error::from)?;

    let mut identifiers = Vec::with_capacity(rows.len());
    let mut total_match_count = 0i64;
    let mut total_last_seen_utc: Option<DateTime<Utc>> = None;

    for row in &rows {
        let identifier_id: String = row.try_get("IdentifierId").map_err(anyhow::Error::from)?;
        let identifier_type: String = row.try_get("Type").map_err(anyhow::Error::from)?;
        let last_seen_utc: Option<String> = row.try_get("LastSeenUtc").map_err(anyhow::Error::from)?;
        let match_count: i64 = row.try_get("MatchCount").map_err(anyhow::Error::from)?;
        let last_seen_utc = last_seen_utc
            .map(|t| DateTime::parse_from_rfc3339(&t).map(|t| t.with_timezone(&Utc)))
            .transpose()
            .map_err(anyhow::Error::from)?;

        total_match_count += match_count;
        total_last_seen_utc = match (total_last_seen_utc, last_seen_utc) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };

        identifiers.push(IdentifierPresenceSummary {
            identifier_id: Uuid::parse_str(&identifier_id).map_err(anyhow::Error::from)?,
            identifier_type: identifier_type.parse().map_err(|e: CaseGraphError| anyhow::anyhow!(e))?,
            value_raw: row.try_get("ValueRaw").map_err(anyhow::Error::from)?,
            match_count,
            last_seen_utc,
        });
    }

    Ok(TargetPresenceSummary {
        target_id,
        identifiers,
        total_match_count,
        total_last_seen_utc,
    })
}
