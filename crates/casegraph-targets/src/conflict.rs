//! Conflict-resolution strategies for `AddIdentifier`/`UpdateIdentifier`
//! and cross-case global-person syncing (`spec.md §4.6`).

/// What to do when an identifier already links to a different [`Target`](casegraph_types::model::Target)
/// within the same case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierConflictStrategy {
    /// Raise [`casegraph_types::error::CaseGraphError::IdentifierConflict`].
    Cancel,
    /// Leave existing links untouched; the caller's effective target
    /// becomes the one the identifier already belongs to.
    UseExistingTarget,
    /// Add a secondary, non-primary link to the requested target in
    /// addition to the existing one.
    KeepExistingAndAlsoLinkToRequestedTarget,
    /// Remove every existing link for this identifier and link it to the
    /// requested target instead.
    MoveIdentifierToRequestedTarget,
}

/// What to do when a `PersonIdentifier` already belongs to a different
/// [`GlobalPerson`](casegraph_types::model::GlobalPerson) during cross-case
/// sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalPersonConflictStrategy {
    /// Raise [`casegraph_types::error::CaseGraphError::GlobalPersonIdentifierConflict`].
    Cancel,
    /// Switch the target's `globalEntityId` to the conflicting person's.
    UseExistingPerson,
    /// Reassign the existing `PersonIdentifier` row to the requested
    /// person.
    MoveIdentifierToRequestedPerson,
}
