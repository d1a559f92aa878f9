//! Identifier type aliases.
//!
//! Every entity in the workspace store is keyed by a v4 UUID. Aliasing
//! instead of newtyping keeps the SQL layer (which binds raw `Uuid` values)
//! simple while still documenting intent at every call site.

use uuid::Uuid;

/// Identifies a [`crate::model::Case`].
pub type CaseId = Uuid;
/// Identifies an [`crate::model::EvidenceItem`].
pub type EvidenceItemId = Uuid;
/// Identifies an [`crate::model::AuditEvent`].
pub type AuditEventId = Uuid;
/// Identifies a [`crate::model::Job`].
pub type JobId = Uuid;
/// Identifies a [`crate::model::MessageThread`].
pub type ThreadId = Uuid;
/// Identifies a [`crate::model::MessageEvent`].
pub type MessageEventId = Uuid;
/// Identifies a [`crate::model::MessageParticipant`].
pub type ParticipantId = Uuid;
/// Identifies a [`crate::model::Target`].
pub type TargetId = Uuid;
/// Identifies a [`crate::model::TargetAlias`].
pub type AliasId = Uuid;
/// Identifies a [`crate::model::Identifier`].
pub type IdentifierId = Uuid;
/// Identifies a [`crate::model::TargetIdentifierLink`].
pub type LinkId = Uuid;
/// Identifies a [`crate::model::MessageParticipantLink`].
pub type ParticipantLinkId = Uuid;
/// Identifies a derived [`crate::model::TargetMessagePresence`] row.
pub type PresenceId = Uuid;
/// Identifies a [`crate::model::GlobalPerson`].
pub type GlobalPersonId = Uuid;
/// Identifies a [`crate::model::PersonAlias`].
pub type PersonAliasId = Uuid;
/// Identifies a [`crate::model::PersonIdentifier`].
pub type PersonIdentifierId = Uuid;
/// A random token attached to one logical operation, carried through logs
/// for correlation (`spec.md` glossary: "Correlation id").
pub type CorrelationId = Uuid;
