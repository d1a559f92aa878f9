#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

//! **casegraph-types** – shared identifiers, entity row types, job payload
//! schemas, and the workspace-wide error taxonomy for CaseGraph.
//!
//! This crate has no I/O of its own; it exists so every other crate in the
//! workspace agrees on the shape of a `Case`, a `Job`, an `Identifier`, and
//! so on, without depending on each other.

/// Entity identifiers (UUID aliases).
pub mod ids;
/// Entity row types mirrored onto the workspace store schema.
pub mod model;
/// Typed, versioned job payloads.
pub mod job_payload;
/// The workspace-wide error taxonomy.
pub mod error;
/// Cooperative, hierarchical cancellation tokens.
pub mod cancellation;

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::error::CaseGraphError;
    pub use crate::ids::*;
    pub use crate::job_payload::{JobPayload, JOB_PAYLOAD_SCHEMA_VERSION};
    pub use crate::model::*;
}
