//! `Enqueue`, `Cancel`, and the live `JobInfo` subscription (`spec.md
//! §4.4`). The actual `Execute` dispatch lives in [`crate::runner`]; this
//! module is the half of the Job Queue & Runner that does not need to hold
//! the dispatch channel's receiver.

use std::sync::Arc;

use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use uuid::Uuid;

use casegraph_clock::{Clock, WorkspacePaths};
use casegraph_store::{AuditLog, WriteGate};
use casegraph_types::cancellation::CancellationToken;
use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::{CaseId, EvidenceItemId, JobId};
use casegraph_types::job_payload::JobPayload;
use casegraph_types::model::{Job, JobStatus};
use casegraph_vault::BufferPool;

use crate::cancellation::{CancelEffect, CancellationRegistry};
use crate::info::JobInfo;
use crate::store;

/// Capacity of the live `JobInfo` broadcast channel (`SPEC_FULL.md` §C.1).
const JOB_INFO_BROADCAST_CAPACITY: usize = 1024;

/// The Job Queue: `JobRecord` persistence, the dispatch channel's sending
/// half, the live `JobInfo` tail, and per-job cancellation state. Shared
/// (behind an [`Arc`]) between [`crate::runner::JobRunner`] and every
/// caller that enqueues or cancels work.
pub struct JobQueue {
    pub(crate) pool: SqlitePool,
    pub(crate) gate: Arc<WriteGate>,
    pub(crate) audit_log: Arc<AuditLog>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) paths: WorkspacePaths,
    pub(crate) buffer_pool: Arc<BufferPool>,
    pub(crate) dispatch_tx: mpsc::UnboundedSender<JobId>,
    job_info_tx: broadcast::Sender<JobInfo>,
    pub(crate) cancellation: CancellationRegistry,
    pub(crate) host_token: CancellationToken,
}

impl JobQueue {
    /// Build the queue and its paired [`crate::runner::JobRunner`]. The
    /// runner must be driven (via [`crate::runner::JobRunner::run`]) for
    /// anything enqueued here to actually execute.
    pub fn new(
        pool: SqlitePool,
        gate: Arc<WriteGate>,
        audit_log: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        paths: WorkspacePaths,
        buffer_pool: Arc<BufferPool>,
        host_token: CancellationToken,
    ) -> (Arc<Self>, crate::runner::JobRunner) {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (job_info_tx, _rx) = broadcast::channel(JOB_INFO_BROADCAST_CAPACITY);
        let queue = Arc::new(Self {
            pool,
            gate,
            audit_log,
            clock,
            paths,
            buffer_pool,
            dispatch_tx,
            job_info_tx,
            cancellation: CancellationRegistry::new(),
            host_token,
        });
        let runner = crate::runner::JobRunner::new(Arc::clone(&queue), dispatch_rx);
        (queue, runner)
    }

    /// Subscribe to live `JobInfo` updates, published on every state and
    /// (rate-limited) progress transition.
    pub fn subscribe(&self) -> broadcast::Receiver<JobInfo> {
        self.job_info_tx.subscribe()
    }

    /// Fetch one job's current row.
    pub async fn get_job(&self, job_id: JobId) -> Result<Job, CaseGraphError> {
        store::load_job(&self.pool, job_id).await
    }

    pub(crate) fn publish(&self, job: &Job) {
        self.publish_info(JobInfo::from(job));
    }

    pub(crate) fn publish_info(&self, info: JobInfo) {
        let _ = self.job_info_tx.send(info);
    }

    /// `Enqueue` (`spec.md §4.4`). Rejects `TestLongRunningDelay` outside
    /// debug builds, deduplicates `EvidenceVerify` against any existing
    /// `Queued`/`Running` job for the same evidence item, and otherwise
    /// inserts, audits, publishes, and pushes onto the dispatch channel.
    pub async fn enqueue(&self, payload: JobPayload, operator: &str) -> Result<JobId, CaseGraphError> {
        if matches!(payload, JobPayload::TestLongRunningDelay { .. }) && !cfg!(debug_assertions) {
            return Err(CaseGraphError::UnsupportedJobType(payload.job_type().to_string()));
        }

        let now = self.clock.now_utc();
        let (case_id, evidence_item_id) = payload_scope(&payload);

        if let JobPayload::EvidenceVerify {
            case_id,
            evidence_item_id,
            ..
        } = &payload
        {
            if let Some(existing) = store::find_dedup_candidate(&self.pool, *case_id, *evidence_item_id)
                .await
                .map_err(|e| CaseGraphError::Unknown(e.into()))?
            {
                let case_id = *case_id;
                self.gate
                    .run_write("JobQueue.enqueueDeduplicated", || async {
                        let mut tx = self.pool.begin().await?;
                        store::audit(
                            &mut tx,
                            &self.audit_log,
                            now,
                            operator,
                            "JobEnqueueDeduplicated",
                            Some(case_id),
                            format!("Deduplicated EvidenceVerify onto existing job {existing}"),
                            json!({ "jobId": existing }),
                        )
                        .await?;
                        tx.commit().await
                    })
                    .await?;
                return Ok(existing);
            }
        }

        let job_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();
        let job = store::new_queued_job(
            job_id,
            now,
            payload.job_type(),
            case_id,
            evidence_item_id,
            payload.to_json(),
            correlation_id,
            operator,
        );

        self.gate
            .run_write("JobQueue.enqueue", || async {
                let mut tx = self.pool.begin().await?;
                store::insert_queued_job(&mut tx, &job).await?;
                store::audit(
                    &mut tx,
                    &self.audit_log,
                    now,
                    operator,
                    "JobQueued",
                    case_id,
                    format!("Queued {} job {job_id}", job.job_type),
                    json!({ "jobId": job_id, "jobType": job.job_type }),
                )
                .await?;
                tx.commit().await
            })
            .await?;

        self.publish(&job);
        let _ = self.dispatch_tx.send(job_id);
        Ok(job_id)
    }

    /// `Cancel(jobId)` (`spec.md §4.4`, cancellation decision table).
    pub async fn cancel(&self, job_id: JobId, operator: &str) -> Result<(), CaseGraphError> {
        let job = store::load_job(&self.pool, job_id).await?;

        if job.status == JobStatus::Queued {
            let now = self.clock.now_utc();
            let case_id = job.case_id;
            let canceled = self
                .gate
                .run_write("JobQueue.cancelQueued", || async {
                    let mut tx = self.pool.begin().await?;
                    let did = store::mark_canceled_if_queued(&mut tx, job_id, now).await?;
                    if did {
                        store::audit(
                            &mut tx,
                            &self.audit_log,
                            now,
                            operator,
                            "JobCanceled",
                            case_id,
                            format!("Canceled queued job {job_id}"),
                            json!({ "jobId": job_id }),
                        )
                        .await?;
                    }
                    tx.commit().await?;
                    Ok(did)
                })
                .await?;
            self.cancellation.clear_pending(job_id);
            if canceled {
                let mut updated = job;
                updated.status = JobStatus::Canceled;
                updated.progress = 1.0;
                updated.status_message = "Canceled".to_string();
                self.publish(&updated);
                return Ok(());
            }
            // Lost the race to `Execute`; the job is Running (or already
            // terminal) by now, so fall through to that handling.
        } else if job.status.is_terminal() {
            info!(job_id = %job_id, "AlreadyTerminal");
            return Ok(());
        }

        match self.cancellation.request_cancel(job_id) {
            CancelEffect::TokenCancelled => info!(job_id = %job_id, "cancellation requested on running job"),
            CancelEffect::Pending => info!(job_id = %job_id, "cancellation latched pending Execute registration"),
        }
        Ok(())
    }
}

fn payload_scope(payload: &JobPayload) -> (Option<CaseId>, Option<EvidenceItemId>) {
    match payload {
        JobPayload::EvidenceImport { case_id, .. } => (Some(*case_id), None),
        JobPayload::EvidenceVerify {
            case_id,
            evidence_item_id,
            ..
        } => (Some(*case_id), Some(*evidence_item_id)),
        JobPayload::MessagesIngest {
            case_id,
            evidence_item_id,
            ..
        } => (Some(*case_id), Some(*evidence_item_id)),
        JobPayload::TargetPresenceIndexRebuild { case_id, .. } => (Some(*case_id), None),
        JobPayload::TestLongRunningDelay { .. } => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use casegraph_clock::{SystemClock, WorkspacePaths};
    use casegraph_store::WorkspaceStore;
    use casegraph_types::job_payload::{JobPayload, JOB_PAYLOAD_SCHEMA_VERSION};
    use casegraph_vault::BufferPool;

    use super::*;

    async fn open_queue(dir: &std::path::Path) -> Arc<JobQueue> {
        let paths = WorkspacePaths::at(dir);
        let (store, _outcome) = WorkspaceStore::open(paths.clone()).await.unwrap();
        let gate = Arc::new(WriteGate::new(paths.db_path().display().to_string()));
        let audit_log = Arc::new(store.audit_log().clone());
        let (queue, _runner) = JobQueue::new(
            store.pool().clone(),
            gate,
            audit_log,
            Arc::new(SystemClock),
            paths,
            Arc::new(BufferPool::new()),
            CancellationToken::new(),
        );
        queue
    }

    #[tokio::test]
    async fn duplicate_evidence_verify_enqueue_returns_same_job_id() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path()).await;

        let case_id = Uuid::new_v4();
        let evidence_item_id = Uuid::new_v4();
        let payload = JobPayload::EvidenceVerify {
            schema_version: JOB_PAYLOAD_SCHEMA_VERSION,
            case_id,
            evidence_item_id,
        };

        let first = queue.enqueue(payload.clone(), "tester").await.unwrap();
        let second = queue.enqueue(payload, "tester").await.unwrap();

        assert_eq!(first, second);

        let row_count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "JobRecord""#)
            .fetch_one(&queue.pool)
            .await
            .unwrap();
        assert_eq!(row_count, 1);
    }
}
