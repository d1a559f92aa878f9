//! Evidence Vault-local error enum. Converted into
//! [`casegraph_types::error::CaseGraphError`] at the `casegraph-workspace`
//! facade boundary.

use uuid::Uuid;

/// Errors raised by evidence import/verify operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The source path given to `ImportEvidenceFile` does not exist.
    #[error("source file does not exist: {0}")]
    SourceFileMissing(String),

    /// The evidence item's stored file is missing at verify time.
    #[error("evidence item {0} has no stored file to verify")]
    StoredFileMissing(Uuid),

    /// Any filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Manifest serialization/deserialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<VaultError> for casegraph_types::error::CaseGraphError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::SourceFileMissing(path) => {
                casegraph_types::error::CaseGraphError::InvalidArgument(format!(
                    "source file does not exist: {path}"
                ))
            }
            other => casegraph_types::error::CaseGraphError::Unknown(other.into()),
        }
    }
}
