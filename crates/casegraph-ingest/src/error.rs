//! Message Ingest-local error enum. Converted into
//! [`casegraph_types::error::CaseGraphError`] at the `casegraph-workspace`
//! facade boundary.

/// Errors raised while parsing or persisting a message export.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The source file could not be opened as the format its extension
    /// implies (corrupt XLSX, not actually a ZIP, ...).
    #[error("failed to open {path} as {format}: {source}")]
    UnreadableSource {
        path: String,
        format: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Any database failure during the delete-then-insert transaction.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Any other failure; preserves the underlying error chain.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<IngestError> for casegraph_types::error::CaseGraphError {
    fn from(err: IngestError) -> Self {
        casegraph_types::error::CaseGraphError::Unknown(err.into())
    }
}
