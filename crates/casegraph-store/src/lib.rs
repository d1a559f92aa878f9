#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **casegraph-store** – the workspace's single SQLite database: schema and
//! migrations, the write gate and busy-retry policy, the initializer/repair
//! path, and the append-only audit log.
//!
//! Every other crate that touches `workspace.db` does so through a
//! [`WorkspaceStore`]; none open their own connection pool.

/// Schema DDL and the migration runner.
pub mod schema;
/// The single-writer gate and busy/locked retry policy.
pub mod gate;
/// Append-only audit log with a live broadcast tail.
pub mod audit;
/// Directory bootstrap, schema inspection, and the repair/rebuild path.
pub mod init;
/// `case.json` schema and the atomic snapshot writer.
pub mod snapshot;

use std::sync::Arc;

use sqlx::SqlitePool;

use casegraph_clock::{Clock, SystemClock, WorkspacePaths};
use casegraph_types::error::CaseGraphError;

pub use audit::AuditLog;
pub use gate::WriteGate;
pub use init::InitOutcome;

/// Owns the workspace's connection pool, write gate, audit log, and the
/// injected clock/path resolver every higher-level crate needs.
pub struct WorkspaceStore {
    pool: SqlitePool,
    gate: Arc<WriteGate>,
    audit_log: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    paths: WorkspacePaths,
}

impl WorkspaceStore {
    /// Open (initializing or repairing as needed) the workspace rooted at
    /// `paths`, using the system wall clock.
    pub async fn open(paths: WorkspacePaths) -> Result<(Self, InitOutcome), CaseGraphError> {
        Self::open_with_clock(paths, Arc::new(SystemClock)).await
    }

    /// As [`WorkspaceStore::open`], but with an injected [`Clock`] for
    /// deterministic tests.
    pub async fn open_with_clock(
        paths: WorkspacePaths,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, InitOutcome), CaseGraphError> {
        let (pool, audit_log, outcome) = init::initialize(&paths, clock.as_ref()).await?;
        let gate = Arc::new(WriteGate::new(paths.db_path().display().to_string()));
        Ok((
            Self {
                pool,
                gate,
                audit_log: Arc::new(audit_log),
                clock,
                paths,
            },
            outcome,
        ))
    }

    /// The underlying connection pool. Safe to use directly for reads;
    /// writes should go through [`WorkspaceStore::write_gate`].
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The single-writer gate every mutation must run through.
    pub fn write_gate(&self) -> &WriteGate {
        &self.gate
    }

    /// A clone of the [`Arc`] wrapping this store's write gate, for
    /// callers (e.g. `casegraph-jobs::JobQueue::new`) that need to share
    /// ownership of the exact same gate rather than borrow it.
    pub fn write_gate_arc(&self) -> Arc<WriteGate> {
        Arc::clone(&self.gate)
    }

    /// The append-only audit log and its live tail.
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    /// A clone of the [`Arc`] wrapping this store's audit log.
    pub fn audit_log_arc(&self) -> Arc<AuditLog> {
        Arc::clone(&self.audit_log)
    }

    /// A clone of the injected clock, for callers that need owned
    /// [`Arc<dyn Clock>`] (e.g. `JobQueue::new`).
    pub fn clock_arc(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// The injected time source.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The resolved filesystem layout this store was opened against.
    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_a_usable_pool() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let (store, outcome) = WorkspaceStore::open(paths).await.unwrap();
        assert_eq!(outcome, InitOutcome::Created);
        assert!(schema::has_all_required_tables(store.pool()).await.unwrap());
    }
}
