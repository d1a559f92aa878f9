//! Entity row types mirrored 1:1 onto the workspace store's SQL schema.
//!
//! Field names here are the canonical, stable names referenced by
//! `manifest.json` (`spec.md §6`) and by the FTS trigger definitions in
//! `casegraph-store`; do not rename without updating both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::*;

/// Root of a case subtree. Owns evidence, threads, targets, identifiers,
/// and presence rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub case_id: CaseId,
    pub name: String,
    pub created_at_utc: DateTime<Utc>,
    pub last_opened_at_utc: Option<DateTime<Utc>>,
}

/// Source format of an imported evidence file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    Ufdr,
    Zip,
    Xlsx,
    Plist,
    Other,
}

impl SourceType {
    /// Classify a file by its (case-insensitive) extension, matching the
    /// extension-sniffing the Evidence Vault performs on import.
    pub fn from_extension(extension: &str) -> Self {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "ufdr" => SourceType::Ufdr,
            "zip" => SourceType::Zip,
            "xlsx" => SourceType::Xlsx,
            "plist" => SourceType::Plist,
            _ => SourceType::Other,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceType::Ufdr => "UFDR",
            SourceType::Zip => "ZIP",
            SourceType::Xlsx => "XLSX",
            SourceType::Plist => "PLIST",
            SourceType::Other => "OTHER",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SourceType {
    type Err = crate::error::CaseGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UFDR" => Ok(SourceType::Ufdr),
            "ZIP" => Ok(SourceType::Zip),
            "XLSX" => Ok(SourceType::Xlsx),
            "PLIST" => Ok(SourceType::Plist),
            "OTHER" => Ok(SourceType::Other),
            other => Err(crate::error::CaseGraphError::InvalidArgument(format!(
                "unknown source type: {other}"
            ))),
        }
    }
}

/// A content-addressed artifact imported into a case's vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub evidence_item_id: EvidenceItemId,
    pub case_id: CaseId,
    pub display_name: String,
    pub original_path: String,
    pub original_file_name: String,
    pub added_at_utc: DateTime<Utc>,
    pub size_bytes: u64,
    /// Lowercase hex-encoded SHA-256 digest of the stored file.
    pub sha256_hex: String,
    /// File extension including the leading dot, e.g. `.xlsx`.
    pub file_extension: String,
    pub source_type: SourceType,
    pub manifest_relative_path: String,
    pub stored_relative_path: String,
}

/// An append-only audit trail row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub audit_event_id: AuditEventId,
    pub timestamp_utc: DateTime<Utc>,
    pub operator: String,
    pub action_type: String,
    pub case_id: Option<CaseId>,
    pub evidence_item_id: Option<EvidenceItemId>,
    pub summary: String,
    pub json_payload: serde_json::Value,
}

/// Lifecycle state of a [`Job`]. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Abandoned,
}

impl JobStatus {
    /// `true` once a job has reached one of its terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled | JobStatus::Abandoned
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::Succeeded => "Succeeded",
            JobStatus::Failed => "Failed",
            JobStatus::Canceled => "Canceled",
            JobStatus::Abandoned => "Abandoned",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::CaseGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(JobStatus::Queued),
            "Running" => Ok(JobStatus::Running),
            "Succeeded" => Ok(JobStatus::Succeeded),
            "Failed" => Ok(JobStatus::Failed),
            "Canceled" => Ok(JobStatus::Canceled),
            "Abandoned" => Ok(JobStatus::Abandoned),
            other => Err(crate::error::CaseGraphError::InvalidArgument(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// A durable unit of background work. See `casegraph-jobs` for the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub created_at_utc: DateTime<Utc>,
    pub started_at_utc: Option<DateTime<Utc>>,
    pub completed_at_utc: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub job_type: String,
    pub case_id: Option<CaseId>,
    pub evidence_item_id: Option<EvidenceItemId>,
    /// Monotone non-decreasing while `Running`; always `1.0` once terminal.
    pub progress: f64,
    pub status_message: String,
    pub error_message: Option<String>,
    pub json_payload: serde_json::Value,
    pub correlation_id: CorrelationId,
    pub operator: String,
}

/// Messaging platform a thread/event/participant originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Sms,
    IMessage,
    WhatsApp,
    Signal,
    Instagram,
    Other,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Platform::Sms => "SMS",
            Platform::IMessage => "iMessage",
            Platform::WhatsApp => "WhatsApp",
            Platform::Signal => "Signal",
            Platform::Instagram => "Instagram",
            Platform::Other => "OTHER",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Platform {
    type Err = crate::error::CaseGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SMS" => Ok(Platform::Sms),
            "iMessage" => Ok(Platform::IMessage),
            "WhatsApp" => Ok(Platform::WhatsApp),
            "Signal" => Ok(Platform::Signal),
            "Instagram" => Ok(Platform::Instagram),
            "OTHER" => Ok(Platform::Other),
            other => Err(crate::error::CaseGraphError::InvalidArgument(format!(
                "unknown platform: {other}"
            ))),
        }
    }
}

/// Direction of a message relative to the device that produced the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
    Unknown,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Incoming => "Incoming",
            Direction::Outgoing => "Outgoing",
            Direction::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Direction {
    type Err = crate::error::CaseGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Incoming" => Ok(Direction::Incoming),
            "Outgoing" => Ok(Direction::Outgoing),
            "Unknown" => Ok(Direction::Unknown),
            other => Err(crate::error::CaseGraphError::InvalidArgument(format!(
                "unknown direction: {other}"
            ))),
        }
    }
}

/// A canonical grouping of [`MessageEvent`]s sharing a platform/participant
/// set, deterministically keyed by `thread_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageThread {
    pub thread_id: ThreadId,
    pub case_id: CaseId,
    pub evidence_item_id: EvidenceItemId,
    pub platform: Platform,
    pub thread_key: String,
    pub title: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub source_locator: String,
    pub ingest_module_version: String,
}

/// A single parsed message row. `(evidence_item_id, source_locator)` is
/// unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_event_id: MessageEventId,
    pub thread_id: ThreadId,
    pub case_id: CaseId,
    pub evidence_item_id: EvidenceItemId,
    pub platform: Platform,
    pub timestamp_utc: Option<DateTime<Utc>>,
    pub direction: Direction,
    pub sender: Option<String>,
    pub recipients: Option<String>,
    pub body: Option<String>,
    pub is_deleted: bool,
    pub source_locator: String,
    pub ingest_module_version: String,
}

/// Kind of contact token a [`MessageParticipant`]/[`Identifier`] value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageParticipantKind {
    Email,
    Phone,
    Handle,
}

impl std::fmt::Display for MessageParticipantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageParticipantKind::Email => "email",
            MessageParticipantKind::Phone => "phone",
            MessageParticipantKind::Handle => "handle",
        };
        f.write_str(s)
    }
}

/// A sender/recipient token observed within a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageParticipant {
    pub participant_id: ParticipantId,
    pub thread_id: ThreadId,
    pub value: String,
    pub kind: MessageParticipantKind,
    pub source_locator: String,
    pub ingest_module_version: String,
}

/// An investigative subject within a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub target_id: TargetId,
    pub case_id: CaseId,
    pub display_name: String,
    pub primary_alias: Option<String>,
    pub notes: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
    pub source_type: String,
    pub source_locator: String,
    pub ingest_module_version: String,
    pub global_entity_id: Option<GlobalPersonId>,
}

/// An alternate name for a [`Target`]. Unique by
/// `(case_id, alias_normalized, target_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAlias {
    pub alias_id: AliasId,
    pub target_id: TargetId,
    pub case_id: CaseId,
    pub alias: String,
    pub alias_normalized: String,
}

/// Kind of normalized contact token owned by a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierType {
    Phone,
    Email,
    SocialHandle,
    Other,
}

impl std::fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IdentifierType::Phone => "Phone",
            IdentifierType::Email => "Email",
            IdentifierType::SocialHandle => "SocialHandle",
            IdentifierType::Other => "Other",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for IdentifierType {
    type Err = crate::error::CaseGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Phone" => Ok(IdentifierType::Phone),
            "Email" => Ok(IdentifierType::Email),
            "SocialHandle" => Ok(IdentifierType::SocialHandle),
            "Other" => Ok(IdentifierType::Other),
            other => Err(crate::error::CaseGraphError::InvalidArgument(format!(
                "unknown identifier type: {other}"
            ))),
        }
    }
}

/// A normalized contact token owned by a case. Unique by
/// `(case_id, type, value_normalized)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub identifier_id: IdentifierId,
    pub case_id: CaseId,
    pub r#type: IdentifierType,
    pub value_raw: String,
    pub value_normalized: String,
    pub notes: Option<String>,
    pub source_type: String,
    pub source_locator: String,
    pub ingest_module_version: String,
}

/// Links an [`Identifier`] to a [`Target`]. Unique by
/// `(target_id, identifier_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetIdentifierLink {
    pub link_id: LinkId,
    pub case_id: CaseId,
    pub target_id: TargetId,
    pub identifier_id: IdentifierId,
    pub is_primary: bool,
    pub source_type: String,
    pub source_locator: String,
    pub ingest_module_version: String,
}

/// Role a participant played in a particular message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantRole {
    Sender,
    Recipient,
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParticipantRole::Sender => "Sender",
            ParticipantRole::Recipient => "Recipient",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ParticipantRole {
    type Err = crate::error::CaseGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Sender" => Ok(ParticipantRole::Sender),
            "Recipient" => Ok(ParticipantRole::Recipient),
            other => Err(crate::error::CaseGraphError::InvalidArgument(format!(
                "unknown participant role: {other}"
            ))),
        }
    }
}

/// Links one raw participant token on one message to an [`Identifier`] and,
/// optionally, a [`Target`] (set-null on target delete).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageParticipantLink {
    pub participant_link_id: ParticipantLinkId,
    pub case_id: CaseId,
    pub message_event_id: MessageEventId,
    pub role: ParticipantRole,
    pub participant_raw: String,
    pub identifier_id: IdentifierId,
    pub target_id: Option<TargetId>,
}

/// A cross-case canonical identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalPerson {
    pub global_person_id: GlobalPersonId,
    pub display_name: String,
    pub notes: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

/// An alternate name for a [`GlobalPerson`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonAlias {
    pub person_alias_id: PersonAliasId,
    pub global_person_id: GlobalPersonId,
    pub alias: String,
    pub alias_normalized: String,
}

/// A normalized contact token owned by the cross-case registry. Unique by
/// `(type, value_normalized)` across all cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonIdentifier {
    pub person_identifier_id: PersonIdentifierId,
    pub global_person_id: GlobalPersonId,
    pub r#type: IdentifierType,
    pub value_raw: String,
    pub value_normalized: String,
    pub is_primary: bool,
}

/// Derived proof that an identifier appears as sender or recipient of a
/// message, tied to a target. Never authoritative; always reconstructible
/// from [`Target`], [`TargetIdentifierLink`], [`Identifier`] and
/// [`MessageEvent`] rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMessagePresence {
    pub presence_id: PresenceId,
    pub case_id: CaseId,
    pub target_id: TargetId,
    pub message_event_id: MessageEventId,
    pub matched_identifier_id: IdentifierId,
    pub role: ParticipantRole,
    pub evidence_item_id: EvidenceItemId,
    pub source_locator: String,
    pub message_timestamp_utc: Option<DateTime<Utc>>,
    pub first_seen_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
}
