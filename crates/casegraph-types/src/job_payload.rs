//! Typed, versioned payloads for each `jobType` (`spec.md §9` design note:
//! "Replace reflection-heavy JSON. Define explicit payload structs per
//! `jobType` with a `schemaVersion` discriminant; reject unknown versions").

use serde::{Deserialize, Serialize};

use crate::ids::{CaseId, EvidenceItemId};

/// Current schema version every [`JobPayload`] variant is serialized with.
pub const JOB_PAYLOAD_SCHEMA_VERSION: u32 = 1;

/// One file to import, as supplied to [`JobPayload::EvidenceImport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceImportFile {
    pub absolute_path: String,
    pub display_name: Option<String>,
}

/// The strongly typed body of `Job::json_payload`, discriminated by
/// `jobType` and carrying an explicit `schema_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "jobType")]
pub enum JobPayload {
    #[serde(rename = "EvidenceImport")]
    EvidenceImport {
        schema_version: u32,
        case_id: CaseId,
        files: Vec<EvidenceImportFile>,
    },
    #[serde(rename = "EvidenceVerify")]
    EvidenceVerify {
        schema_version: u32,
        case_id: CaseId,
        evidence_item_id: EvidenceItemId,
    },
    #[serde(rename = "MessagesIngest")]
    MessagesIngest {
        schema_version: u32,
        case_id: CaseId,
        evidence_item_id: EvidenceItemId,
    },
    #[serde(rename = "TargetPresenceIndexRebuild")]
    TargetPresenceIndexRebuild {
        schema_version: u32,
        case_id: CaseId,
    },
    /// Debug-build-only synthetic delay job, used to exercise cancellation.
    #[serde(rename = "TestLongRunningDelay")]
    TestLongRunningDelay {
        schema_version: u32,
        delay_ms: u64,
    },
}

impl JobPayload {
    /// The `jobType` string this payload corresponds to.
    pub fn job_type(&self) -> &'static str {
        match self {
            JobPayload::EvidenceImport { .. } => "EvidenceImport",
            JobPayload::EvidenceVerify { .. } => "EvidenceVerify",
            JobPayload::MessagesIngest { .. } => "MessagesIngest",
            JobPayload::TargetPresenceIndexRebuild { .. } => "TargetPresenceIndexRebuild",
            JobPayload::TestLongRunningDelay { .. } => "TestLongRunningDelay",
        }
    }

    /// The `schema_version` carried by this payload instance.
    pub fn schema_version(&self) -> u32 {
        match self {
            JobPayload::EvidenceImport { schema_version, .. }
            | JobPayload::EvidenceVerify { schema_version, .. }
            | JobPayload::MessagesIngest { schema_version, .. }
            | JobPayload::TargetPresenceIndexRebuild { schema_version, .. }
            | JobPayload::TestLongRunningDelay { schema_version, .. } => *schema_version,
        }
    }

    /// Serialize to the `serde_json::Value` stored in `Job::json_payload`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("JobPayload always serializes")
    }

    /// Parse a stored `Job::json_payload` back into a [`JobPayload`],
    /// rejecting any `schema_version` newer than this build understands.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, crate::error::CaseGraphError> {
        let payload: JobPayload = serde_json::from_value(value.clone())
            .map_err(|e| crate::error::CaseGraphError::InvalidArgument(format!(
                "malformed job payload: {e}"
            )))?;
        if payload.schema_version() > JOB_PAYLOAD_SCHEMA_VERSION {
            return Err(crate::error::CaseGraphError::SchemaVersionUnsupported {
                context: format!("job payload ({})", payload.job_type()),
                expected: JOB_PAYLOAD_SCHEMA_VERSION,
                found: payload.schema_version(),
            });
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let payload = JobPayload::EvidenceVerify {
            schema_version: JOB_PAYLOAD_SCHEMA_VERSION,
            case_id: uuid::Uuid::new_v4(),
            evidence_item_id: uuid::Uuid::new_v4(),
        };
        let json = payload.to_json();
        let parsed = JobPayload::from_json(&json).unwrap();
        assert_eq!(payload, parsed);
    }

    #[test]
    fn rejects_future_schema_version() {
        let json = serde_json::json!({
            "jobType": "TargetPresenceIndexRebuild",
            "schema_version": JOB_PAYLOAD_SCHEMA_VERSION + 1,
            "case_id": uuid::Uuid::new_v4(),
        });
        let err = JobPayload::from_json(&json).unwrap_err();
        assert!(matches!(err, crate::error::CaseGraphError::SchemaVersionUnsupported { .. }));
    }
}
