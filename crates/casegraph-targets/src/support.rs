//! Shared plumbing for Target Registry operations: audit helpers and the
//! trick used to bail a [`casegraph_types::error::CaseGraphError`] out of a
//! [`casegraph_store::WriteGate::run_write`] closure, which is constrained
//! to `Result<T, sqlx::Error>`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Transaction;
use uuid::Uuid;

use casegraph_store::AuditLog;
use casegraph_types::error::CaseGraphError;
use casegraph_types::model::AuditEvent;

/// Marker wrapping a business-level abort (e.g. `IdentifierConflict`) so it
/// survives the trip through `sqlx::Error::Decode` and back.
#[derive(Debug)]
pub(crate) struct Aborted(pub CaseGraphError);

impl std::fmt::Display for Aborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Aborted {}

/// Abort the enclosing `run_write` closure with `err`, to be recovered by
/// [`unwrap_conflict`] after the gate returns.
pub(crate) fn abort<T>(err: CaseGraphError) -> Result<T, sqlx::Error> {
    Err(sqlx::Error::Decode(Box::new(Aborted(err))))
}

/// Recover a business error boxed by [`abort`] out of the
/// [`CaseGraphError::Unknown`] wrapping `run_write` otherwise produces.
pub(crate) fn unwrap_conflict(err: CaseGraphError) -> CaseGraphError {
    let CaseGraphError::Unknown(anyhow_err) = err else {
        return err;
    };
    match anyhow_err.downcast::<sqlx::Error>() {
        Ok(sqlx::Error::Decode(inner)) => match inner.downcast::<Aborted>() {
            Ok(aborted) => aborted.0,
            Err(inner) => CaseGraphError::Unknown(sqlx::Error::Decode(inner).into()),
        },
        Ok(other) => CaseGraphError::Unknown(other.into()),
        Err(anyhow_err) => CaseGraphError::Unknown(anyhow_err),
    }
}

/// Append one audit row inside `tx`; every Target Registry mutation emits
/// at least one (`spec.md §4.6`).
pub(crate) async fn audit(
    tx: &mut Transaction<'_, sqlx::Sqlite>,
    audit_log: &AuditLog,
    now: DateTime<Utc>,
    operator: &str,
    action_type: &str,
    case_id: Option<Uuid>,
    summary: String,
    json_payload: Value,
) -> Result<(), sqlx::Error> {
    audit_log
        .append(
            tx,
            AuditEvent {
                audit_event_id: Uuid::new_v4(),
                timestamp_utc: now,
                operator: operator.to_string(),
                action_type: action_type.to_string(),
                case_id,
                evidence_item_id: None,
                summary,
                json_payload,
            },
        )
        .await
}
