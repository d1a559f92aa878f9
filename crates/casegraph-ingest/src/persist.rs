//! Canonical persistence for a parsed message batch (`spec.md §4.5`,
//! "Persistence"): one transaction per ingest, delete-then-insert so
//! re-running ingest on the same evidence item is idempotent
//! (`spec.md §9` open question: "the observable contract is
//! 'idempotent full-replace', not 'partial'").

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use casegraph_store::WriteGate;
use casegraph_types::model::{Direction, MessageParticipantKind, Platform};

use crate::parsed_message::ParsedMessage;

/// Outcome of persisting one ingest batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistOutcome {
    pub messages_extracted: usize,
    pub threads_created: usize,
}

/// Replace every thread/event/participant row for `evidence_item_id` with
/// the rows derived from `messages`, inside one write-gated transaction.
pub async fn persist_ingest(
    pool: &SqlitePool,
    gate: &WriteGate,
    case_id: Uuid,
    evidence_item_id: Uuid,
    messages: Vec<ParsedMessage>,
    now: DateTime<Utc>,
    ingest_module_version: &str,
) -> Result<PersistOutcome, crate::error::IngestError> {
    let outcome = gate
        .run_write("MessagesIngest.persist", || {
            run_once(pool, case_id, evidence_item_id, &messages, now, ingest_module_version)
        })
        .await
        .map_err(|e| crate::error::IngestError::Other(e.into()))?;
    Ok(outcome)
}

async fn run_once(
    pool: &SqlitePool,
    case_id: Uuid,
    evidence_item_id: Uuid,
    messages: &[ParsedMessage],
    now: DateTime<Utc>,
    ingest_module_version: &str,
) -> Result<PersistOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    // Deleting the thread cascades to MessageEventRecord and
    // MessageParticipantRecord (both reference ThreadId ON DELETE CASCADE).
    sqlx::query(
        r#"DELETE FROM "MessageThreadRecord" WHERE "EvidenceItemId" = ?"#,
    )
    .bind(evidence_item_id.to_string())
    .execute(&mut *tx)
    .await?;

    // Group messages by (platform, thread_key); thread creation time is
    // the earliest message timestamp in the group, or `now` if none carry
    // one.
    let mut groups: BTreeMap<(String, String), Vec<&ParsedMessage>> = BTreeMap::new();
    for message in messages {
        groups
            .entry((message.platform.to_string(), message.thread_key.clone()))
            .or_default()
            .push(message);
    }

    let mut threads_created = 0usize;
    let mut messages_extracted = 0usize;

    for ((platform_str, thread_key), group) in groups {
        let thread_id = Uuid::new_v4();
        let platform: Platform = platform_str.parse().unwrap_or(Platform::Other);
        let created_at_utc = group
            .iter()
            .filter_map(|m| m.timestamp_utc)
            .min()
            .unwrap_or(now);
        let first_locator = group[0].source_locator.clone();

        sqlx::query(
            r#"INSERT INTO "MessageThreadRecord"
               ("ThreadId", "CaseId", "EvidenceItemId", "Platform", "ThreadKey", "Title",
                "CreatedAtUtc", "SourceLocator", "IngestModuleVersion")
               VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?)"#,
        )
        .bind(thread_id.to_string())
        .bind(case_id.to_string())
        .bind(evidence_item_id.to_string())
        .bind(platform.to_string())
        .bind(&thread_key)
        .bind(created_at_utc.to_rfc3339())
        .bind(&first_locator)
        .bind(ingest_module_version)
        .execute(&mut *tx)
        .await?;
        threads_created += 1;

        let mut participant_values: HashSet<String> = HashSet::new();
        let mut ordered_values: Vec<String> = Vec::new();

        for message in &group {
            let message_event_id = Uuid::new_v4();
            sqlx::query(
                r#"INSERT INTO "MessageEventRecord"
                   ("MessageEventId", "ThreadId", "CaseId", "EvidenceItemId", "Platform",
                    "TimestampUtc", "Direction", "Sender", "Recipients", "Body", "IsDeleted",
                    "SourceLocator", "IngestModuleVersion")
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(message_event_id.to_string())
            .bind(thread_id.to_string())
            .bind(case_id.to_string())
            .bind(evidence_item_id.to_string())
            .bind(message.platform.to_string())
            .bind(message.timestamp_utc.map(|t| t.to_rfc3339()))
            .bind(direction_str(message.direction))
            .bind(&message.sender)
            .bind(&message.recipients)
            .bind(&message.body)
            .bind(message.is_deleted)
            .bind(&message.source_locator)
            .bind(ingest_module_version)
            .execute(&mut *tx)
            .await?;
            messages_extracted += 1;

            for raw in split_participant_tokens(message.sender.as_deref())
                .into_iter()
                .chain(split_participant_tokens(message.recipients.as_deref()))
            {
                if participant_values.insert(raw.to_ascii_lowercase()) {
                    ordered_values.push(raw);
                }
            }
        }

        for value in ordered_values {
            let kind = classify_kind(&value);
            sqlx::query(
                r#"INSERT INTO "MessageParticipantRecord"
                   ("ParticipantId", "ThreadId", "Value", "Kind", "SourceLocator", "IngestModuleVersion")
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(thread_id.to_string())
            .bind(&value)
            .bind(kind.to_string())
            .bind(&first_locator)
            .bind(ingest_module_version)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(PersistOutcome {
        messages_extracted,
        threads_created,
    })
}

fn direction_str(direction: Direction) -> &'static str {
    match direction {
        Direction::Incoming => "Incoming",
        Direction::Outgoing => "Outgoing",
        Direction::Unknown => "Unknown",
    }
}

/// Split a `sender`/`recipients` cell on `,;|`, trim, and deduplicate
/// case-insensitively while preserving the first-seen casing.
fn split_participant_tokens(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else { return Vec::new() };
    let mut seen_lower: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for token in raw.split(|c| c == ',' || c == ';' || c == '|') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_ascii_lowercase();
        if seen_lower.insert(lower) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// Classify a participant token's [`MessageParticipantKind`]
/// (`spec.md §4.5`): email if it contains `@`, phone if it has at least 7
/// digits, handle otherwise.
fn classify_kind(value: &str) -> MessageParticipantKind {
    if value.contains('@') {
        MessageParticipantKind::Email
    } else if value.chars().filter(|c| c.is_ascii_digit()).count() >= 7 {
        MessageParticipantKind::Phone
    } else {
        MessageParticipantKind::Handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_email_phone_and_handle() {
        assert_eq!(classify_kind("alice@example.com"), MessageParticipantKind::Email);
        assert_eq!(classify_kind("+15551234567"), MessageParticipantKind::Phone);
        assert_eq!(classify_kind("alice_handle"), MessageParticipantKind::Handle);
    }

    #[test]
    fn split_dedupes_case_insensitively_preserving_first_casing() {
        let tokens = split_participant_tokens(Some("Bob,bob;BOB|carol"));
        assert_eq!(tokens, vec!["Bob".to_string(), "carol".to_string()]);
    }
}
