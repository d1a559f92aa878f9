//! `VerifyEvidence` (`spec.md §4.3`).

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::instrument;

use casegraph_clock::WorkspacePaths;
use casegraph_types::model::EvidenceItem;
use uuid::Uuid;

use crate::error::VaultError;
use crate::pool::{BufferPool, CHUNK_SIZE};

/// Outcome of re-hashing an evidence item's stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// `true` iff the recomputed digest matches `item.sha256_hex`,
    /// case-insensitively.
    pub ok: bool,
    /// Short, deterministic, human-readable message.
    pub message: String,
}

/// Recompute the SHA-256 of the evidence item's stored file and compare it
/// against the recorded digest.
#[instrument(skip(paths, buffer_pool, item), fields(evidence_item_id = %item.evidence_item_id))]
pub async fn verify_evidence(
    paths: &WorkspacePaths,
    buffer_pool: &Arc<BufferPool>,
    item: &EvidenceItem,
) -> Result<VerifyOutcome, VaultError> {
    let stored_path = paths
        .evidence_dir(item.case_id, item.evidence_item_id)
        .join(&item.stored_relative_path);

    let mut src = match fs::File::open(&stored_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(VerifyOutcome {
                ok: false,
                message: "Stored evidence file is missing.".to_string(),
            });
        }
        Err(e) => return Err(VaultError::Io(e)),
    };

    let mut hasher = Sha256::new();
    let mut chunk = buffer_pool.checkout();
    loop {
        let read = src.read(&mut chunk[..CHUNK_SIZE]).await?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    let recomputed = hex::encode(hasher.finalize());

    let ok = recomputed.eq_ignore_ascii_case(&item.sha256_hex);
    let message = if ok {
        "Evidence verify completed.".to_string()
    } else {
        "SHA-256 mismatch.".to_string()
    };
    Ok(VerifyOutcome { ok, message })
}

/// Re-exported for callers that only have the ids, not a fully hydrated
/// [`EvidenceItem`], e.g. a future remote-store counterpart.
pub fn stored_file_missing_for(evidence_item_id: Uuid) -> VaultError {
    VaultError::StoredFileMissing(evidence_item_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use casegraph_types::model::SourceType;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_item(case_id: Uuid, evidence_item_id: Uuid, sha256_hex: &str) -> EvidenceItem {
        EvidenceItem {
            evidence_item_id,
            case_id,
            display_name: "evidence.bin".to_string(),
            original_path: "/tmp/evidence.bin".to_string(),
            original_file_name: "evidence.bin".to_string(),
            added_at_utc: Utc::now(),
            size_bytes: 4,
            sha256_hex: sha256_hex.to_string(),
            file_extension: ".bin".to_string(),
            source_type: SourceType::Other,
            manifest_relative_path: "manifest.json".to_string(),
            stored_relative_path: "original/evidence.bin".to_string(),
        }
    }

    #[tokio::test]
    async fn matching_digest_reports_ok() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let pool = Arc::new(BufferPool::new());
        let case_id = Uuid::new_v4();
        let evidence_item_id = Uuid::new_v4();

        let original_dir = paths.evidence_original_dir(case_id, evidence_item_id);
        fs::create_dir_all(&original_dir).await.unwrap();
        fs::write(original_dir.join("evidence.bin"), b"test").await.unwrap();

        let sha256_hex = hex::encode(Sha256::digest(b"test"));
        let item = sample_item(case_id, evidence_item_id, &sha256_hex);

        let outcome = verify_evidence(&paths, &pool, &item).await.unwrap();
        assert!(outcome.ok);
    }

    #[tokio::test]
    async fn missing_file_reports_not_ok() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let pool = Arc::new(BufferPool::new());
        let case_id = Uuid::new_v4();
        let evidence_item_id = Uuid::new_v4();

        let item = sample_item(case_id, evidence_item_id, "deadbeef");
        let outcome = verify_evidence(&paths, &pool, &item).await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.message, "Stored evidence file is missing.");
    }

    #[tokio::test]
    async fn tampered_file_reports_mismatch() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let pool = Arc::new(BufferPool::new());
        let case_id = Uuid::new_v4();
        let evidence_item_id = Uuid::new_v4();

        let original_dir = paths.evidence_original_dir(case_id, evidence_item_id);
        fs::create_dir_all(&original_dir).await.unwrap();
        fs::write(original_dir.join("evidence.bin"), b"tampered").await.unwrap();

        let item = sample_item(case_id, evidence_item_id, "0000000000000000000000000000000000000000000000000000000000000000");
        let outcome = verify_evidence(&paths, &pool, &item).await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.message, "SHA-256 mismatch.");
    }
}
