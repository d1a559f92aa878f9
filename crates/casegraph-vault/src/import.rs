//! `ImportEvidenceFile` (`spec.md §4.3`, step 1-3; the `EvidenceItem` row
//! and `case.json` rewrite in step 4 belong to `casegraph-workspace`, which
//! calls this module first).

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

use casegraph_clock::{Clock, WorkspacePaths};
use casegraph_types::cancellation::CancellationToken;
use casegraph_types::model::{EvidenceItem, SourceType};

use crate::error::VaultError;
use crate::manifest::{ManifestV1, MANIFEST_SCHEMA_VERSION};
use crate::pool::{BufferPool, CHUNK_SIZE};

/// Result of a successful [`import_evidence_file`] call.
#[derive(Debug, Clone)]
pub struct ImportedEvidence {
    /// The row the caller must persist via the Workspace Store.
    pub evidence_item: EvidenceItem,
}

/// Reports `(bytes_processed, total_bytes)` after every chunk and once more
/// at completion with `bytes_processed == total_bytes`.
pub trait ImportProgress {
    /// Called after each chunk is hashed and written.
    fn on_progress(&mut self, bytes_processed: u64, total_bytes: u64);
}

impl<F: FnMut(u64, u64)> ImportProgress for F {
    fn on_progress(&mut self, bytes_processed: u64, total_bytes: u64) {
        self(bytes_processed, total_bytes)
    }
}

/// Stream-copy `absolute_path` into the case's vault, computing its SHA-256
/// digest incrementally and writing the `manifest.json` sidecar.
#[instrument(skip(paths, clock, buffer_pool, progress), fields(case_id = %case_id))]
pub async fn import_evidence_file(
    paths: &WorkspacePaths,
    clock: &dyn Clock,
    buffer_pool: &Arc<BufferPool>,
    case_id: Uuid,
    operator: &str,
    absolute_path: &Path,
    cancellation: &CancellationToken,
    mut progress: impl ImportProgress,
) -> Result<ImportedEvidence, VaultError> {
    let metadata = fs::metadata(absolute_path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            VaultError::SourceFileMissing(absolute_path.display().to_string())
        } else {
            VaultError::Io(e)
        }
    })?;
    let total_bytes = metadata.len();

    let evidence_item_id = Uuid::new_v4();
    let original_file_name = absolute_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| absolute_path.display().to_string());
    let file_extension = absolute_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let source_type = SourceType::from_extension(&file_extension);

    let original_dir = paths.evidence_original_dir(case_id, evidence_item_id);
    fs::create_dir_all(&original_dir).await?;
    let dest_path = original_dir.join(&original_file_name);

    let mut src = fs::File::open(absolute_path).await?;
    let mut dest = fs::File::create(&dest_path).await?;

    let mut hasher = Sha256::new();
    let mut bytes_processed: u64 = 0;
    let mut chunk = buffer_pool.checkout();

    loop {
        cancellation.check().map_err(|_| {
            VaultError::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, "canceled"))
        })?;
        let read = src.read(&mut chunk[..CHUNK_SIZE]).await?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
        dest.write_all(&chunk[..read]).await?;
        bytes_processed += read as u64;
        progress.on_progress(bytes_processed, total_bytes);
    }
    dest.flush().await?;
    drop(chunk);

    let sha256_hex = hex::encode(hasher.finalize());
    progress.on_progress(total_bytes, total_bytes);

    let manifest_relative_path = paths
        .manifest_path(case_id, evidence_item_id)
        .strip_prefix(paths.evidence_dir(case_id, evidence_item_id))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "manifest.json".to_string());
    let stored_relative_path = format!("original/{original_file_name}");

    let added_at_utc = clock.now_utc();
    let manifest = ManifestV1 {
        schema_version: MANIFEST_SCHEMA_VERSION,
        evidence_item_id,
        case_id,
        added_at_utc,
        operator: operator.to_string(),
        original_path: absolute_path.display().to_string(),
        original_file_name: original_file_name.clone(),
        stored_relative_path: stored_relative_path.clone(),
        size_bytes: total_bytes,
        sha256_hex: sha256_hex.clone(),
        file_extension: file_extension.clone(),
        source_type,
    };
    let manifest_json = serde_json::to_vec_pretty(&manifest)?;
    fs::write(paths.manifest_path(case_id, evidence_item_id), manifest_json).await?;

    Ok(ImportedEvidence {
        evidence_item: EvidenceItem {
            evidence_item_id,
            case_id,
            display_name: original_file_name.clone(),
            original_path: absolute_path.display().to_string(),
            original_file_name,
            added_at_utc,
            size_bytes: total_bytes,
            sha256_hex,
            file_extension,
            source_type,
            manifest_relative_path,
            stored_relative_path,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn imports_file_and_computes_known_digest() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let clock = casegraph_clock::SystemClock;
        let pool = Arc::new(BufferPool::new());
        let cancellation = CancellationToken::new();

        let source_path = dir.path().join("evidence.bin");
        fs::write(&source_path, vec![0u8; 1024 * 1024]).await.unwrap();

        let mut last_progress = (0u64, 0u64);
        let result = import_evidence_file(
            &paths,
            &clock,
            &pool,
            Uuid::new_v4(),
            "tester",
            &source_path,
            &cancellation,
            |processed, total| last_progress = (processed, total),
        )
        .await
        .unwrap();

        assert_eq!(
            result.evidence_item.sha256_hex,
            "30e14955ebf1352266dc2ff8067e68104607e750abb9d3b36582b8af909fcb58"
        );
        assert_eq!(last_progress.0, last_progress.1);
        assert_eq!(result.evidence_item.size_bytes, 1024 * 1024);
    }

    #[tokio::test]
    async fn missing_source_file_is_invalid_argument() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let clock = casegraph_clock::SystemClock;
        let pool = Arc::new(BufferPool::new());
        let cancellation = CancellationToken::new();

        let missing = dir.path().join("does-not-exist.bin");
        let result = import_evidence_file(
            &paths,
            &clock,
            &pool,
            Uuid::new_v4(),
            "tester",
            &missing,
            &cancellation,
            |_, _| {},
        )
        .await;

        assert!(matches!(result, Err(VaultError::SourceFileMissing(_))));
    }
}
