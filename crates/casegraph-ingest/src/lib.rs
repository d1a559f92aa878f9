#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **casegraph-ingest** – the Message Ingest Pipeline (`spec.md §4.5`):
//! parser selection by extension, the XLSX workbook parser, the UFDR/ZIP
//! archive (JSON + XML) parser, and the canonical delete-then-insert
//! persistence of the resulting threads/events/participants.

/// Workbook header synonym lookup shared by the workbook and archive
/// parsers.
pub mod header;
/// The parser-agnostic `ParsedMessage` intermediate representation and
/// normalization helpers.
pub mod parsed_message;
/// The XLSX workbook parser.
pub mod workbook;
/// The UFDR/ZIP archive (JSON + XML) parser.
pub mod archive;
/// Transactional persistence of a parsed batch.
pub mod persist;
/// Ingest-local error enum.
pub mod error;

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use casegraph_store::WriteGate;

pub use error::IngestError;
pub use parsed_message::ParsedMessage;
pub use persist::PersistOutcome;

/// The `ingest_module_version` stamped onto every thread/event/participant
/// row this build produces, so a future parser rewrite can tell which rows
/// it is safe to treat as stale.
pub const INGEST_MODULE_VERSION: &str = "casegraph-ingest/1";

/// Outcome of one `MessagesIngest` run, as reported by the Job Runner
/// (`spec.md §4.4`).
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub messages_extracted: usize,
    pub threads_created: usize,
    /// Set when the batch came back empty with a specific, human-readable
    /// reason (`spec.md §4.5`); `None` on an ordinary non-empty ingest.
    pub empty_reason: Option<String>,
}

/// Parse `absolute_path` (selecting a parser by its lowercase extension)
/// and persist the resulting messages for `evidence_item_id`, replacing
/// whatever was ingested for it before.
///
/// `on_progress` receives fractions in `[0, 1]`; this function itself does
/// not emit the job-level `0.05 "Parsing..."` pre-step or the final
/// summary message — `casegraph-jobs` owns the surrounding job progress
/// policy (`spec.md §4.4`).
pub async fn ingest_evidence_file(
    pool: &SqlitePool,
    gate: &WriteGate,
    case_id: Uuid,
    evidence_item_id: Uuid,
    absolute_path: &Path,
    now: DateTime<Utc>,
    mut on_progress: impl FnMut(f64),
) -> Result<IngestOutcome, IngestError> {
    let file_name = absolute_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| absolute_path.display().to_string());
    let extension = absolute_path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let (messages, empty_reason) = match extension.as_str() {
        "xlsx" => {
            let result = workbook::parse_workbook(absolute_path, &file_name, &mut on_progress)?;
            (result.messages, result.empty_reason)
        }
        "ufdr" => {
            let result = archive::parse_archive(absolute_path, &file_name, &mut on_progress)?;
            (result.messages, result.empty_reason)
        }
        _ => {
            on_progress(0.70);
            (
                Vec::new(),
                Some("No message parser is available for this evidence type.".to_string()),
            )
        }
    };

    if messages.is_empty() {
        // Still perform the delete, so re-ingesting an evidence item that
        // now parses to zero messages clears out whatever a prior,
        // differently-configured run had left behind.
        let outcome =
            persist::persist_ingest(pool, gate, case_id, evidence_item_id, messages, now, INGEST_MODULE_VERSION)
                .await?;
        return Ok(IngestOutcome {
            messages_extracted: outcome.messages_extracted,
            threads_created: outcome.threads_created,
            empty_reason,
        });
    }

    let outcome =
        persist::persist_ingest(pool, gate, case_id, evidence_item_id, messages, now, INGEST_MODULE_VERSION).await?;

    Ok(IngestOutcome {
        messages_extracted: outcome.messages_extracted,
        threads_created: outcome.threads_created,
        empty_reason: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::tempdir;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        casegraph_store::schema::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn unsupported_extension_yields_empty_reason() {
        let pool = memory_pool().await;
        let gate = WriteGate::new(":memory:");
        let dir = tempdir().unwrap();
        let path = dir.path().join("evidence.plist");
        std::fs::write(&path, b"not a recognized export").unwrap();

        let outcome = ingest_evidence_file(&pool, &gate, Uuid::new_v4(), Uuid::new_v4(), &path, Utc::now(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.messages_extracted, 0);
        assert_eq!(
            outcome.empty_reason.as_deref(),
            Some("No message parser is available for this evidence type.")
        );
    }
}
