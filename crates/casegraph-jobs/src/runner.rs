//! The hosted runner loop: `dequeue -> execute -> loop`, plus the startup
//! priming pass (`spec.md §4.4`, "Dispatch").
//!
//! One runner owns the single reader of the dispatch channel; nothing else
//! may drain it, which is what gives the queue its FIFO dispatch-order
//! guarantee (`spec.md §5`, "Ordering guarantees").

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, instrument, warn};

use casegraph_types::ids::JobId;
use casegraph_types::job_payload::JobPayload;
use casegraph_types::model::JobStatus;

use crate::dispatch;
use crate::progress::ProgressTracker;
use crate::queue::JobQueue;
use crate::store;

/// Drives one [`JobQueue`]'s dispatch channel to completion. Construct via
/// [`JobQueue::new`]; run with [`JobRunner::run`] on a long-lived task.
pub struct JobRunner {
    queue: Arc<JobQueue>,
    dispatch_rx: mpsc::UnboundedReceiver<JobId>,
}

impl JobRunner {
    pub(crate) fn new(queue: Arc<JobQueue>, dispatch_rx: mpsc::UnboundedReceiver<JobId>) -> Self {
        Self { queue, dispatch_rx }
    }

    /// Prime the channel with every `Queued` row (oldest first), then loop
    /// `dequeue -> execute -> loop` until the sending half is dropped.
    /// Execution errors are caught per-job; they never terminate the loop
    /// (`spec.md §4.4`: "catching execution errors without terminating the
    /// loop").
    pub async fn run(mut self) {
        if let Err(error) = self.prime().await {
            error!(%error, "failed to prime job queue from prior Queued rows");
        }

        while let Some(job_id) = self.dispatch_rx.recv().await {
            if let Err(error) = self.execute(job_id).await {
                error!(job_id = %job_id, %error, "job execution failed");
            }
        }
    }

    async fn prime(&self) -> Result<(), sqlx::Error> {
        let queued = store::list_queued_ordered(&self.queue.pool).await?;
        for job_id in queued {
            let _ = self.queue.dispatch_tx.send(job_id);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn execute(&self, job_id: JobId) -> Result<(), CaseGraphExecuteError> {
        let job = store::load_job(&self.queue.pool, job_id).await?;
        if job.status != JobStatus::Queued {
            return Ok(());
        }

        let now = self.queue.clock.now_utc();
        let became_running = self
            .queue
            .gate
            .run_write("JobRunner.transitionToRunning", || async {
                let mut tx = self.queue.pool.begin().await?;
                let did = store::transition_to_running(&mut tx, job_id, now).await?;
                tx.commit().await?;
                Ok(did)
            })
            .await?;
        if !became_running {
            return Ok(());
        }

        let mut running = job.clone();
        running.status = JobStatus::Running;
        running.started_at_utc = Some(running.started_at_utc.unwrap_or(now));
        self.queue.publish(&running);

        let token = self.queue.host_token.child_token();
        let token = self.queue.cancellation.register(job_id, token);

        let payload = JobPayload::from_json(&job.json_payload)?;
        let mut tracker = ProgressTracker::new();
        let outcome = dispatch::run(&self.queue, &running, &payload, &token, &mut tracker).await;

        self.queue.cancellation.unregister(job_id);
        let finished_at = self.queue.clock.now_utc();

        let (status, status_message, error_message) = match outcome {
            Ok(summary) => (JobStatus::Succeeded, format!("Succeeded: {summary}"), None),
            Err(casegraph_types::error::CaseGraphError::Canceled) => {
                (JobStatus::Canceled, "Canceled".to_string(), None)
            }
            Err(error) => {
                let summary = error.short_summary();
                (
                    JobStatus::Failed,
                    format!("Failed: {summary}"),
                    Some(format!("{error}")),
                )
            }
        };

        store::finish_job(
            &self.queue.pool,
            &self.queue.audit_log,
            job_id,
            job.case_id,
            status,
            &status_message,
            error_message.as_deref(),
            &job.operator,
            finished_at,
        )
        .await?;

        let mut finished = running;
        finished.status = status;
        finished.progress = 1.0;
        finished.status_message = status_message;
        finished.error_message = error_message;
        finished.completed_at_utc = Some(finished_at);
        self.queue.publish(&finished);

        Ok(())
    }
}

/// Internal error union for [`JobRunner::execute`]; never surfaced past
/// `run`'s catch-and-log boundary.
#[derive(Debug, thiserror::Error)]
enum CaseGraphExecuteError {
    #[error(transparent)]
    CaseGraph(#[from] casegraph_types::error::CaseGraphError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::tempdir;

    use casegraph_clock::{SystemClock, WorkspacePaths};
    use casegraph_store::WorkspaceStore;
    use casegraph_types::cancellation::CancellationToken;
    use casegraph_types::job_payload::{JobPayload, JOB_PAYLOAD_SCHEMA_VERSION};
    use casegraph_vault::BufferPool;

    use crate::queue::JobQueue;

    async fn open_queue(dir: &std::path::Path) -> (Arc<JobQueue>, super::JobRunner) {
        let paths = WorkspacePaths::at(dir);
        let (store, _outcome) = WorkspaceStore::open(paths.clone()).await.unwrap();
        let gate = Arc::new(casegraph_store::WriteGate::new(paths.db_path().display().to_string()));
        let audit_log = Arc::new(store.audit_log().clone());
        JobQueue::new(
            store.pool().clone(),
            gate,
            audit_log,
            Arc::new(SystemClock),
            paths,
            Arc::new(BufferPool::new()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn runner_executes_primed_queued_job_to_success() {
        let dir = tempdir().unwrap();
        let (queue, runner) = open_queue(dir.path()).await;

        let job_id = queue
            .enqueue(
                JobPayload::TestLongRunningDelay {
                    schema_version: JOB_PAYLOAD_SCHEMA_VERSION,
                    delay_ms: 20,
                },
                "tester",
            )
            .await
            .unwrap();

        let handle = tokio::spawn(runner.run());
        for _ in 0..100 {
            let job = queue.get_job(job_id).await.unwrap();
            if job.status.is_terminal() {
                assert_eq!(job.status, casegraph_types::model::JobStatus::Succeeded);
                assert_eq!(job.progress, 1.0);
                assert!(job.completed_at_utc.is_some());
                handle.abort();
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn runner_continues_after_one_job_fails() {
        let dir = tempdir().unwrap();
        let (queue, runner) = open_queue(dir.path()).await;

        let bad_evidence_id = uuid::Uuid::new_v4();
        let failing = queue
            .enqueue(
                JobPayload::EvidenceVerify {
                    schema_version: JOB_PAYLOAD_SCHEMA_VERSION,
                    case_id: uuid::Uuid::new_v4(),
                    evidence_item_id: bad_evidence_id,
                },
                "tester",
            )
            .await
            .unwrap();
        let ok = queue
            .enqueue(
                JobPayload::TestLongRunningDelay {
                    schema_version: JOB_PAYLOAD_SCHEMA_VERSION,
                    delay_ms: 20,
                },
                "tester",
            )
            .await
            .unwrap();

        let handle = tokio::spawn(runner.run());
        for _ in 0..100 {
            let a = queue.get_job(failing).await.unwrap();
            let b = queue.get_job(ok).await.unwrap();
            if a.status.is_terminal() && b.status.is_terminal() {
                assert_eq!(a.status, casegraph_types::model::JobStatus::Failed);
                assert_eq!(b.status, casegraph_types::model::JobStatus::Succeeded);
                handle.abort();
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("jobs never reached a terminal state");
    }
}
