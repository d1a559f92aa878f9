//! `manifest.json` schema v1 (`spec.md §6`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use casegraph_types::model::SourceType;

/// Current manifest schema version this build writes and accepts.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// The on-disk `manifest.json` sidecar written next to every imported
/// evidence file. Field names are stable and PascalCase per `spec.md §6`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestV1 {
    pub schema_version: u32,
    pub evidence_item_id: Uuid,
    pub case_id: Uuid,
    pub added_at_utc: DateTime<Utc>,
    pub operator: String,
    pub original_path: String,
    pub original_file_name: String,
    /// Forward-slash relative path from the evidence item's directory.
    pub stored_relative_path: String,
    pub size_bytes: u64,
    /// Lowercase, 64 hex characters.
    pub sha256_hex: String,
    /// Includes the leading dot, e.g. `.xlsx`.
    pub file_extension: String,
    pub source_type: SourceType,
}
