//! `case.json` schema and the atomic snapshot writer (`spec.md §6`,
//! `§4.1` "Rebuilder", `§4.3` step 4).
//!
//! `case.json` and each evidence item's `manifest.json` are the
//! authoritative, human-readable record of a case; `workspace.db` is a
//! derived index that the Rebuilder can always reconstruct from them. Every
//! mutation that changes a case's identity or evidence list is expected to
//! call [`write_case_snapshot`] in the same step that commits the database
//! write, so the two never drift for longer than one operation.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tokio::fs;
use uuid::Uuid;

use casegraph_clock::WorkspacePaths;
use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::CaseId;
use casegraph_types::model::{Case, EvidenceItem, SourceType};
use casegraph_vault::ManifestV1;

/// The `CaseInfo` object inside `case.json`. PascalCase field names are
/// stable on-disk identifiers, independent of `Case`'s Rust-idiomatic
/// snake_case fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaseInfoSnapshot {
    pub case_id: Uuid,
    pub name: String,
    pub created_at_utc: DateTime<Utc>,
    pub last_opened_at_utc: Option<DateTime<Utc>>,
}

impl From<&Case> for CaseInfoSnapshot {
    fn from(case: &Case) -> Self {
        Self {
            case_id: case.case_id,
            name: case.name.clone(),
            created_at_utc: case.created_at_utc,
            last_opened_at_utc: case.last_opened_at_utc,
        }
    }
}

impl From<CaseInfoSnapshot> for Case {
    fn from(snapshot: CaseInfoSnapshot) -> Self {
        Case {
            case_id: snapshot.case_id,
            name: snapshot.name,
            created_at_utc: snapshot.created_at_utc,
            last_opened_at_utc: snapshot.last_opened_at_utc,
        }
    }
}

/// One evidence item as it appears inside `case.json`'s `Evidence[]`
/// array. Same field set as [`ManifestV1`] plus the two columns that only
/// live in `EvidenceItemRecord` (`DisplayName`, `ManifestRelativePath`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EvidenceItemSnapshot {
    pub evidence_item_id: Uuid,
    pub case_id: Uuid,
    pub display_name: String,
    pub original_path: String,
    pub original_file_name: String,
    pub added_at_utc: DateTime<Utc>,
    pub size_bytes: u64,
    pub sha256_hex: String,
    pub file_extension: String,
    pub source_type: SourceType,
    pub manifest_relative_path: String,
    pub stored_relative_path: String,
}

impl From<&EvidenceItem> for EvidenceItemSnapshot {
    fn from(item: &EvidenceItem) -> Self {
        Self {
            evidence_item_id: item.evidence_item_id,
            case_id: item.case_id,
            display_name: item.display_name.clone(),
            original_path: item.original_path.clone(),
            original_file_name: item.original_file_name.clone(),
            added_at_utc: item.added_at_utc,
            size_bytes: item.size_bytes,
            sha256_hex: item.sha256_hex.clone(),
            file_extension: item.file_extension.clone(),
            source_type: item.source_type,
            manifest_relative_path: item.manifest_relative_path.clone(),
            stored_relative_path: item.stored_relative_path.clone(),
        }
    }
}

impl From<EvidenceItemSnapshot> for EvidenceItem {
    fn from(snapshot: EvidenceItemSnapshot) -> Self {
        EvidenceItem {
            evidence_item_id: snapshot.evidence_item_id,
            case_id: snapshot.case_id,
            display_name: snapshot.display_name,
            original_path: snapshot.original_path,
            original_file_name: snapshot.original_file_name,
            added_at_utc: snapshot.added_at_utc,
            size_bytes: snapshot.size_bytes,
            sha256_hex: snapshot.sha256_hex,
            file_extension: snapshot.file_extension,
            source_type: snapshot.source_type,
            manifest_relative_path: snapshot.manifest_relative_path,
            stored_relative_path: snapshot.stored_relative_path,
        }
    }
}

/// The full `case.json` document: `CaseInfo` plus every evidence item's
/// snapshot (`spec.md §6`: "object with `CaseInfo{...}` and `Evidence[]` of
/// EvidenceItem snapshots").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaseSnapshotV1 {
    pub case_info: CaseInfoSnapshot,
    pub evidence: Vec<EvidenceItemSnapshot>,
}

/// Load `CaseRecord` and every `EvidenceItemRecord` row owned by `case_id`
/// and rewrite `case.json` atomically (write to a sibling `.tmp` file,
/// `fsync`, then rename over the target).
pub async fn write_case_snapshot(
    pool: &SqlitePool,
    paths: &WorkspacePaths,
    case_id: CaseId,
) -> Result<(), CaseGraphError> {
    let case = load_case(pool, case_id).await?;
    let evidence = load_evidence_items(pool, case_id).await?;

    let snapshot = CaseSnapshotV1 {
        case_info: CaseInfoSnapshot::from(&case),
        evidence: evidence.iter().map(EvidenceItemSnapshot::from).collect(),
    };

    let case_dir = paths.case_dir(case_id);
    fs::create_dir_all(&case_dir)
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?;

    let target = paths.case_snapshot_path(case_id);
    write_json_atomically(&target, &snapshot).await
}

/// Read a `case.json` file back, if present. Used by the Rebuilder and by
/// [`crate::init::initialize`]'s disk-reconstitution path.
pub async fn read_case_snapshot(path: &Path) -> Result<Option<CaseSnapshotV1>, CaseGraphError> {
    match fs::read(path).await {
        Ok(bytes) => {
            let snapshot = serde_json::from_slice(&bytes).map_err(|e| CaseGraphError::Unknown(e.into()))?;
            Ok(Some(snapshot))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CaseGraphError::Unknown(e.into())),
    }
}

/// Read one evidence item's `manifest.json`, if present, translated into
/// the same [`EvidenceItemSnapshot`] shape `case.json` uses. `manifest.json`
/// does not carry `DisplayName`; it is synthesized from `OriginalFileName`,
/// matching what Evidence Import writes at creation time.
pub async fn read_manifest_as_snapshot(path: &Path) -> Result<Option<EvidenceItemSnapshot>, CaseGraphError> {
    match fs::read(path).await {
        Ok(bytes) => {
            let manifest: ManifestV1 = serde_json::from_slice(&bytes).map_err(|e| CaseGraphError::Unknown(e.into()))?;
            Ok(Some(EvidenceItemSnapshot {
                evidence_item_id: manifest.evidence_item_id,
                case_id: manifest.case_id,
                display_name: manifest.original_file_name.clone(),
                original_path: manifest.original_path,
                original_file_name: manifest.original_file_name,
                added_at_utc: manifest.added_at_utc,
                size_bytes: manifest.size_bytes,
                sha256_hex: manifest.sha256_hex,
                file_extension: manifest.file_extension,
                source_type: manifest.source_type,
                manifest_relative_path: "manifest.json".to_string(),
                stored_relative_path: manifest.stored_relative_path,
            }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CaseGraphError::Unknown(e.into())),
    }
}

async fn write_json_atomically<T: Serialize>(target: &Path, value: &T) -> Result<(), CaseGraphError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let tmp_path = target.with_extension("json.tmp");

    fs::write(&tmp_path, &json).await.map_err(|e| CaseGraphError::Unknown(e.into()))?;
    fs::rename(&tmp_path, target).await.map_err(|e| CaseGraphError::Unknown(e.into()))?;
    Ok(())
}

async fn load_case(pool: &SqlitePool, case_id: CaseId) -> Result<Case, CaseGraphError> {
    let row = sqlx::query(r#"SELECT "CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc" FROM "CaseRecord" WHERE "CaseId" = ?"#)
        .bind(case_id.to_string())
        .fetch_optional(pool)
        .await
        .map_err(|e| CaseGraphError::Unknown(e.into()))?
        .ok_or_else(|| CaseGraphError::case_not_found(case_id))?;

    row_to_case(&row)
}

fn row_to_case(row: &sqlx::sqlite::SqliteRow) -> Result<Case, CaseGraphError> {
    let case_id: String = row.try_get("CaseId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let created_at_utc: String = row.try_get("CreatedAtUtc").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let last_opened_at_utc: Option<String> = row.try_get("LastOpenedAtUtc").map_err(|e| CaseGraphError::Unknown(e.into()))?;

    Ok(Case {
        case_id: parse_uuid(&case_id)?,
        name: row.try_get("Name").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        created_at_utc: parse_timestamp(&created_at_utc)?,
        last_opened_at_utc: last_opened_at_utc.map(|s| parse_timestamp(&s)).transpose()?,
    })
}

async fn load_evidence_items(pool: &SqlitePool, case_id: CaseId) -> Result<Vec<EvidenceItem>, CaseGraphError> {
    let rows = sqlx::query(
        r#"SELECT "EvidenceItemId", "CaseId", "DisplayName", "OriginalPath", "OriginalFileName",
           "AddedAtUtc", "SizeBytes", "Sha256Hex", "FileExtension", "SourceType",
           "ManifestRelativePath", "StoredRelativePath"
           FROM "EvidenceItemRecord" WHERE "CaseId" = ? ORDER BY "AddedAtUtc" ASC"#,
    )
    .bind(case_id.to_string())
    .fetch_all(pool)
    .await
    .map_err(|e| CaseGraphError::Unknown(e.into()))?;

    rows.iter().map(row_to_evidence_item).collect()
}

fn row_to_evidence_item(row: &sqlx::sqlite::SqliteRow) -> Result<EvidenceItem, CaseGraphError> {
    let evidence_item_id: String = row.try_get("EvidenceItemId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let case_id: String = row.try_get("CaseId").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let added_at_utc: String = row.try_get("AddedAtUtc").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let size_bytes: i64 = row.try_get("SizeBytes").map_err(|e| CaseGraphError::Unknown(e.into()))?;
    let source_type: String = row.try_get("SourceType").map_err(|e| CaseGraphError::Unknown(e.into()))?;

    Ok(EvidenceItem {
        evidence_item_id: parse_uuid(&evidence_item_id)?,
        case_id: parse_uuid(&case_id)?,
        display_name: row.try_get("DisplayName").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        original_path: row.try_get("OriginalPath").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        original_file_name: row.try_get("OriginalFileName").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        added_at_utc: parse_timestamp(&added_at_utc)?,
        size_bytes: size_bytes as u64,
        sha256_hex: row.try_get("Sha256Hex").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        file_extension: row.try_get("FileExtension").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        source_type: source_type.parse()?,
        manifest_relative_path: row.try_get("ManifestRelativePath").map_err(|e| CaseGraphError::Unknown(e.into()))?,
        stored_relative_path: row.try_get("StoredRelativePath").map_err(|e| CaseGraphError::Unknown(e.into()))?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid, CaseGraphError> {
    Uuid::parse_str(s).map_err(|e| CaseGraphError::Unknown(e.into()))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, CaseGraphError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CaseGraphError::Unknown(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::tempdir;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        crate::schema::migrate(&pool).await.unwrap();
        pool
    }

    async fn seed_case(pool: &SqlitePool, case_id: Uuid, now: DateTime<Utc>) {
        sqlx::query(r#"INSERT INTO "CaseRecord" ("CaseId", "Name", "CreatedAtUtc", "LastOpenedAtUtc") VALUES (?, ?, ?, ?)"#)
            .bind(case_id.to_string())
            .bind("Sample Case")
            .bind(now.to_rfc3339())
            .bind(Option::<String>::None)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn writes_and_reads_back_case_snapshot() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let pool = memory_pool().await;
        let case_id = Uuid::new_v4();
        let now = Utc::now();
        seed_case(&pool, case_id, now).await;

        write_case_snapshot(&pool, &paths, case_id).await.unwrap();

        let snapshot = read_case_snapshot(&paths.case_snapshot_path(case_id)).await.unwrap().unwrap();
        assert_eq!(snapshot.case_info.case_id, case_id);
        assert_eq!(snapshot.case_info.name, "Sample Case");
        assert!(snapshot.evidence.is_empty());
    }

    #[tokio::test]
    async fn snapshot_json_uses_pascal_case_keys() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let pool = memory_pool().await;
        let case_id = Uuid::new_v4();
        seed_case(&pool, case_id, Utc::now()).await;

        write_case_snapshot(&pool, &paths, case_id).await.unwrap();

        let raw = fs::read_to_string(paths.case_snapshot_path(case_id)).await.unwrap();
        assert!(raw.contains("\"CaseInfo\""));
        assert!(raw.contains("\"CaseId\""));
        assert!(raw.contains("\"Evidence\""));
    }
}
