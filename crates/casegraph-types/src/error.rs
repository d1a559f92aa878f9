//! Workspace-wide error taxonomy (`spec.md §7`).
//!
//! Every crate has its own local error enum grounded in the operations it
//! performs; at the `casegraph-workspace` facade boundary those all convert
//! into this one taxonomy so an external CLI/UI shell has a single surface
//! to pattern-match on.

use crate::ids::{CaseId, CorrelationId, EvidenceItemId, JobId, TargetId};

/// The workspace-wide error taxonomy described in `spec.md §7`.
#[derive(Debug, thiserror::Error)]
pub enum CaseGraphError {
    /// A referenced entity (case/evidence/job/target/identifier/...) does
    /// not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A caller-supplied argument failed validation (empty id, empty name,
    /// malformed payload, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A persisted payload or manifest carries a `schemaVersion` this build
    /// does not understand.
    #[error("unsupported schema version {found} (expected {expected}) in {context}")]
    SchemaVersionUnsupported {
        context: String,
        expected: u32,
        found: u32,
    },

    /// Recomputed SHA-256 did not match the recorded digest.
    #[error("SHA-256 mismatch. Stored file contents changed.")]
    IntegrityMismatch,

    /// Adding/updating an identifier would link it to a second target.
    #[error("identifier already linked to target {existing_target_name} ({existing_target_id})")]
    IdentifierConflict {
        existing_target_id: TargetId,
        existing_target_name: String,
    },

    /// Syncing an identifier into the cross-case registry found it already
    /// owned by a different person.
    #[error("identifier already linked to global person {existing_display_name} ({existing_person_id})")]
    GlobalPersonIdentifierConflict {
        existing_person_id: crate::ids::GlobalPersonId,
        existing_display_name: String,
    },

    /// The write gate's busy-retry budget was exhausted.
    #[error("workspace database locked during {operation} after {attempts} attempt(s) on {path}")]
    WorkspaceDbLocked {
        operation: String,
        attempts: u32,
        path: String,
    },

    /// The initializer could not reach a valid schema even after a repair
    /// pass. Fatal.
    #[error("invalid workspace state (correlation id {correlation_id})")]
    InvalidWorkspaceState { correlation_id: CorrelationId },

    /// A cooperative cancellation was observed at a suspension point.
    #[error("operation canceled")]
    Canceled,

    /// A job referenced by id could not be found or acted upon.
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// The job type named in an enqueue request is not one this build
    /// knows how to execute.
    #[error("unsupported job type: {0}")]
    UnsupportedJobType(String),

    /// Any other failure; preserves the underlying error chain.
    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl CaseGraphError {
    /// Build a [`CaseGraphError::NotFound`] for a case.
    pub fn case_not_found(case_id: CaseId) -> Self {
        CaseGraphError::NotFound(format!("case {case_id}"))
    }

    /// Build a [`CaseGraphError::NotFound`] for an evidence item.
    pub fn evidence_not_found(evidence_item_id: EvidenceItemId) -> Self {
        CaseGraphError::NotFound(format!("evidence item {evidence_item_id}"))
    }

    /// A short, deterministic, human-readable summary suitable for
    /// `Job::status_message` (`spec.md §7`: "User-visible messages MUST be
    /// short, human-readable, and deterministic").
    pub fn short_summary(&self) -> String {
        match self {
            CaseGraphError::IntegrityMismatch => "SHA-256 mismatch.".to_string(),
            CaseGraphError::Canceled => "Canceled".to_string(),
            CaseGraphError::NotFound(what) => format!("Not found: {what}"),
            CaseGraphError::InvalidArgument(_) => "Invalid argument".to_string(),
            CaseGraphError::WorkspaceDbLocked { .. } => "Workspace database locked".to_string(),
            other => {
                let full = other.to_string();
                if full.len() > 120 {
                    format!("{}...", &full[..117])
                } else {
                    full
                }
            }
        }
    }
}
