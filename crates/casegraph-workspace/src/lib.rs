#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **casegraph-workspace** – the facade crate: Case lifecycle
//! (create/open/list/delete), legacy JSON adoption, Query Services, and
//! the `WorkspaceHealth` snapshot (`spec.md §2` last two component rows;
//! `SPEC_FULL.md` §A/§C).
//!
//! [`Workspace`] is the single type an external CLI/UI shell depends on.
//! It owns the [`casegraph_store::WorkspaceStore`], the evidence buffer
//! pool, and the paired [`casegraph_jobs::JobQueue`]/[`casegraph_jobs::JobRunner`],
//! and exposes the write gate, audit log, pool, clock, and paths every
//! other crate's free functions need as arguments. Target registry,
//! search, and association-graph operations are *not* re-wrapped here one
//! parameter list at a time — a caller reaches for `casegraph-targets`,
//! `casegraph-search`, or `casegraph-graph` directly, passing
//! [`Workspace::pool`]/[`Workspace::write_gate`]/[`Workspace::audit_log`];
//! this crate only adds value where case lifecycle, crash-repair
//! adoption, and cross-cutting listings live.

/// Case lifecycle: create/open/list/delete, and legacy `case.json`/
/// `manifest.json` directory adoption (`spec.md §4.1`, `SPEC_FULL.md` §C.4).
pub mod case;
/// `WorkspaceHealth`: counts of cases/evidence/queued jobs and the last
/// rebuild timestamp (`SPEC_FULL.md` §C.3).
pub mod health;
/// Query Services: paged, ordered listings for cases/evidence/jobs/audit
/// (`spec.md §2` last row).
pub mod query;

use std::sync::Arc;

use sqlx::SqlitePool;

use casegraph_clock::{Clock, WorkspacePaths};
use casegraph_jobs::{JobQueue, JobRunner};
use casegraph_store::{AuditLog, InitOutcome, WorkspaceStore, WriteGate};
use casegraph_types::cancellation::CancellationToken;
use casegraph_types::error::CaseGraphError;
use casegraph_vault::BufferPool;

pub use case::{AdoptionOutcome, CaseSummary};
pub use health::WorkspaceHealth;
pub use query::{Page, PageRequest};

/// The durable core of one CaseGraph offline workspace: the store, the
/// shared evidence buffer pool, and the job queue. Construct with
/// [`Workspace::open`]; drive the paired runner with
/// [`Workspace::take_job_runner`] on a long-lived task before enqueueing
/// anything (`spec.md §4.4`: "A hosted runner loops...").
pub struct Workspace {
    store: WorkspaceStore,
    buffer_pool: Arc<BufferPool>,
    jobs: Arc<JobQueue>,
    job_runner: Option<JobRunner>,
    init_outcome: InitOutcome,
}

impl Workspace {
    /// Open (initializing/repairing as needed) the workspace rooted at
    /// `paths`, using the system wall clock and a fresh host cancellation
    /// token.
    pub async fn open(paths: WorkspacePaths) -> Result<Self, CaseGraphError> {
        Self::open_with_clock(paths, Arc::new(casegraph_clock::SystemClock)).await
    }

    /// As [`Workspace::open`], but with an injected [`Clock`] for
    /// deterministic tests.
    pub async fn open_with_clock(paths: WorkspacePaths, clock: Arc<dyn Clock>) -> Result<Self, CaseGraphError> {
        let (store, init_outcome) = WorkspaceStore::open_with_clock(paths.clone(), clock).await?;
        let buffer_pool = Arc::new(BufferPool::new());
        let host_token = CancellationToken::new();
        let (jobs, job_runner) = JobQueue::new(
            store.pool().clone(),
            store.write_gate_arc(),
            store.audit_log_arc(),
            store.clock_arc(),
            paths,
            Arc::clone(&buffer_pool),
            host_token,
        );

        Ok(Self {
            store,
            buffer_pool,
            jobs,
            job_runner: Some(job_runner),
            init_outcome,
        })
    }

    /// How the workspace came to be open: freshly created, migrated in
    /// place, or repaired by rebuilding from on-disk snapshots
    /// (`spec.md §4.1`).
    pub fn init_outcome(&self) -> &InitOutcome {
        &self.init_outcome
    }

    /// Take ownership of the paired [`JobRunner`] so the caller can drive
    /// it (`spec.md §4.4`: `dequeue -> execute -> loop`) on its own
    /// long-lived task. Returns `None` if already taken — a workspace has
    /// exactly one runner to hand out.
    pub fn take_job_runner(&mut self) -> Option<JobRunner> {
        self.job_runner.take()
    }

    /// The job queue: `enqueue`, `cancel`, `subscribe`, `get_job`
    /// (`spec.md §4.4`).
    pub fn jobs(&self) -> &Arc<JobQueue> {
        &self.jobs
    }

    /// The underlying connection pool. Safe for reads directly; writes
    /// must go through [`Workspace::write_gate`].
    pub fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }

    /// The single-writer gate every mutation must run through
    /// (`spec.md §4.2`).
    pub fn write_gate(&self) -> &WriteGate {
        self.store.write_gate()
    }

    /// The append-only audit log and its live tail (`spec.md §4.1`).
    pub fn audit_log(&self) -> &AuditLog {
        self.store.audit_log()
    }

    /// The injected time source.
    pub fn clock(&self) -> &dyn Clock {
        self.store.clock()
    }

    /// The resolved filesystem layout this workspace was opened against.
    pub fn paths(&self) -> &WorkspacePaths {
        self.store.paths()
    }

    /// The shared byte-buffer pool evidence import/verify rent from
    /// (`spec.md §4.3`, `§5` "Shared resource policy").
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    /// Snapshot current case/evidence/job counts for an external shell's
    /// status bar (`SPEC_FULL.md` §C.3).
    pub async fn health(&self) -> Result<WorkspaceHealth, CaseGraphError> {
        health::snapshot(self.pool(), &self.init_outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_wires_store_and_job_queue_over_the_same_gate() {
        let dir = tempdir().unwrap();
        let paths = WorkspacePaths::at(dir.path());
        let mut workspace = Workspace::open(paths).await.unwrap();
        assert_eq!(*workspace.init_outcome(), InitOutcome::Created);

        let runner = workspace.take_job_runner();
        assert!(runner.is_some());
        assert!(workspace.take_job_runner().is_none());
    }
}
