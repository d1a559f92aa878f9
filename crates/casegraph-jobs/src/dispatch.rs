//! `Execute`'s per-`jobType` bodies (`spec.md §4.4`, "Dispatch on
//! `jobType`").

use std::time::Duration;

use casegraph_clock::Clock;
use casegraph_types::cancellation::CancellationToken;
use casegraph_types::error::CaseGraphError;
use casegraph_types::ids::{CaseId, EvidenceItemId, JobId};
use casegraph_types::job_payload::{EvidenceImportFile, JobPayload};
use casegraph_types::model::{Job, JobStatus};

use crate::info::JobInfo;
use crate::progress::ProgressTracker;
use crate::queue::JobQueue;
use crate::store;

/// Threads progress reports from a dispatch body through the progress
/// policy and out to [`JobQueue`]'s live subscribers and `JobRecord`.
struct Reporter<'a> {
    queue: &'a JobQueue,
    job_id: JobId,
    job_type: String,
    case_id: Option<CaseId>,
    evidence_item_id: Option<EvidenceItemId>,
    tracker: &'a mut ProgressTracker,
}

impl<'a> Reporter<'a> {
    async fn report(&mut self, progress: f64, status_message: impl Into<String>) {
        let Some(update) = self.tracker.record(progress, status_message) else {
            return;
        };

        self.queue.publish_info(JobInfo {
            job_id: self.job_id,
            status: JobStatus::Running,
            job_type: self.job_type.clone(),
            case_id: self.case_id,
            evidence_item_id: self.evidence_item_id,
            progress: update.progress,
            status_message: update.status_message.clone(),
            error_message: None,
            started_at_utc: None,
            completed_at_utc: None,
        });

        if update.should_persist {
            if let Err(error) = store::persist_progress(&self.queue.pool, self.job_id, update.progress, &update.status_message).await {
                if self.tracker.note_persist_failed() {
                    tracing::warn!(job_id = %self.job_id, %error, "JobProgressUpdateDropped");
                }
            }
        }
    }
}

/// Run `job`'s `payload` to completion, returning the success summary on
/// `Ok` (the caller prefixes it with `"Succeeded: "`).
pub(crate) async fn run(
    queue: &JobQueue,
    job: &Job,
    payload: &JobPayload,
    token: &CancellationToken,
    tracker: &mut ProgressTracker,
) -> Result<String, CaseGraphError> {
    let mut reporter = Reporter {
        queue,
        job_id: job.job_id,
        job_type: job.job_type.clone(),
        case_id: job.case_id,
        evidence_item_id: job.evidence_item_id,
        tracker,
    };

    match payload {
        JobPayload::EvidenceImport { case_id, files, .. } => evidence_import(queue, *case_id, &job.operator, files, token, &mut reporter).await,
        JobPayload::EvidenceVerify {
            evidence_item_id, ..
        } => evidence_verify(queue, *evidence_item_id, token, &mut reporter).await,
        JobPayload::MessagesIngest {
            case_id,
            evidence_item_id,
            ..
        } => messages_ingest(queue, *case_id, *evidence_item_id, &job.operator, token, &mut reporter).await,
        JobPayload::TargetPresenceIndexRebuild { case_id, .. } => presence_rebuild(queue, *case_id, token, &mut reporter).await,
        JobPayload::TestLongRunningDelay { delay_ms, .. } => test_long_running_delay(*delay_ms, token, &mut reporter).await,
    }
}

async fn evidence_import(
    queue: &JobQueue,
    case_id: CaseId,
    operator: &str,
    files: &[EvidenceImportFile],
    token: &CancellationToken,
    reporter: &mut Reporter<'_>,
) -> Result<String, CaseGraphError> {
    let total = files.len().max(1) as f64;
    let mut imported = 0usize;

    for (index, file) in files.iter().enumerate() {
        token.check()?;
        let display_name = file.display_name.clone().unwrap_or_else(|| file.absolute_path.clone());
        reporter.report(index as f64 / total, format!("Importing {}/{}: {display_name}", index + 1, files.len())).await;

        let path = std::path::Path::new(&file.absolute_path);
        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<(u64, u64)>();
        let import_future = casegraph_vault::import_evidence_file(
            &queue.paths,
            queue.clock.as_ref(),
            &queue.buffer_pool,
            case_id,
            operator,
            path,
            token,
            move |processed, total_bytes| {
                let _ = progress_tx.send((processed, total_bytes));
            },
        );
        tokio::pin!(import_future);

        let imported_evidence = loop {
            tokio::select! {
                biased;
                Some((processed, total_bytes)) = progress_rx.recv() => {
                    let inner_frac = if total_bytes == 0 { 1.0 } else { processed as f64 / total_bytes as f64 };
                    reporter
                        .report(
                            (index as f64 + inner_frac) / total,
                            format!("Importing {}/{}: {display_name}", index + 1, files.len()),
                        )
                        .await;
                }
                result = &mut import_future => {
                    break result?;
                }
            }
        };
        // Drain any chunk ticks the vault sent but the select loop hadn't
        // consumed yet before the future itself resolved.
        while let Ok((processed, total_bytes)) = progress_rx.try_recv() {
            let inner_frac = if total_bytes == 0 { 1.0 } else { processed as f64 / total_bytes as f64 };
            reporter
                .report(
                    (index as f64 + inner_frac) / total,
                    format!("Importing {}/{}: {display_name}", index + 1, files.len()),
                )
                .await;
        }

        let now = queue.clock.now_utc();
        queue
            .gate
            .run_write("JobQueue.evidenceImport.persist", || async {
                let mut tx = queue.pool.begin().await?;
                store::insert_evidence_item(&mut tx, &imported_evidence.evidence_item).await?;
                store::audit(
                    &mut tx,
                    &queue.audit_log,
                    now,
                    operator,
                    "EvidenceImported",
                    Some(case_id),
                    format!("Imported {display_name} as evidence item {}", imported_evidence.evidence_item.evidence_item_id),
                    serde_json::json!({ "evidenceItemId": imported_evidence.evidence_item.evidence_item_id }),
                )
                .await?;
                tx.commit().await
            })
            .await?;

        // The Case snapshot is rewritten after the row commits, never inside
        // the same transaction: a crash between the two leaves the DB row as
        // the source of truth and the next rebuild (or the next import)
        // simply rewrites `case.json` again.
        casegraph_store::snapshot::write_case_snapshot(&queue.pool, &queue.paths, case_id).await?;

        imported += 1;
        reporter
            .report((index + 1) as f64 / total, format!("Importing {}/{}: {display_name}", index + 1, files.len()))
            .await;
    }

    Ok(format!("Imported {imported} evidence file(s)"))
}

async fn evidence_verify(queue: &JobQueue, evidence_item_id: EvidenceItemId, token: &CancellationToken, reporter: &mut Reporter<'_>) -> Result<String, CaseGraphError> {
    reporter.report(0.10, "Loading evidence item...").await;
    token.check()?;
    let item = store::load_evidence_item(&queue.pool, evidence_item_id).await?;

    reporter.report(0.30, "Recomputing SHA-256...").await;
    let outcome = casegraph_vault::verify_evidence(&queue.paths, &queue.buffer_pool, &item).await?;

    if !outcome.ok {
        return Err(CaseGraphError::IntegrityMismatch);
    }

    reporter.report(1.0, outcome.message.clone()).await;
    Ok(outcome.message)
}

async fn messages_ingest(
    queue: &JobQueue,
    case_id: CaseId,
    evidence_item_id: EvidenceItemId,
    operator: &str,
    token: &CancellationToken,
    reporter: &mut Reporter<'_>,
) -> Result<String, CaseGraphError> {
    reporter.report(0.05, "Parsing...").await;
    token.check()?;

    let item = store::load_evidence_item(&queue.pool, evidence_item_id).await?;
    let stored_path = queue.paths.evidence_dir(case_id, evidence_item_id).join(&item.stored_relative_path);

    let now = queue.clock.now_utc();
    let outcome = casegraph_ingest::ingest_evidence_file(&queue.pool, &queue.gate, case_id, evidence_item_id, &stored_path, now, |fraction| {
        let _ = fraction;
    })
    .await?;

    token.check()?;
    reporter.report(0.85, "Refreshing presence index...").await;
    casegraph_presence::rebuild(&queue.pool, &queue.gate, now, casegraph_presence::RebuildScope::Evidence(case_id, evidence_item_id)).await?;

    let summary = match &outcome.empty_reason {
        Some(reason) => reason.clone(),
        None => format!("Extracted {} message(s)", outcome.messages_extracted),
    };

    let per_platform = store::count_messages_by_platform(&queue.pool, evidence_item_id).await.map_err(|e| CaseGraphError::Unknown(e.into()))?;
    queue
        .gate
        .run_write("JobQueue.messagesIngest.audit", || async {
            let mut tx = queue.pool.begin().await?;
            store::audit(
                &mut tx,
                &queue.audit_log,
                now,
                operator,
                "MessagesIngested",
                Some(case_id),
                format!("{summary} from evidence item {evidence_item_id}"),
                serde_json::json!({ "evidenceItemId": evidence_item_id, "threadsCreated": outcome.threads_created, "byPlatform": per_platform }),
            )
            .await?;
            tx.commit().await
        })
        .await?;

    reporter.report(1.0, summary.clone()).await;
    Ok(summary)
}

async fn presence_rebuild(queue: &JobQueue, case_id: CaseId, token: &CancellationToken, reporter: &mut Reporter<'_>) -> Result<String, CaseGraphError> {
    reporter.report(0.15, "Rebuilding presence index...").await;
    token.check()?;
    let now = queue.clock.now_utc();
    let outcome = casegraph_presence::rebuild(&queue.pool, &queue.gate, now, casegraph_presence::RebuildScope::Case(case_id)).await?;
    let summary = format!("Rebuilt presence index ({} row(s))", outcome.rows_inserted);
    reporter.report(1.0, summary.clone()).await;
    Ok(summary)
}

/// Debug-build-only synthetic delay used to exercise cancellation
/// end-to-end (`spec.md §4.4`: "20 evenly-spaced progress ticks summing to
/// the delay").
#[cfg(debug_assertions)]
async fn test_long_running_delay(delay_ms: u64, token: &CancellationToken, reporter: &mut Reporter<'_>) -> Result<String, CaseGraphError> {
    const TICKS: u64 = 20;
    let per_tick = Duration::from_millis(delay_ms / TICKS);
    for tick in 1..=TICKS {
        token.check()?;
        tokio::time::sleep(per_tick).await;
        reporter.report(tick as f64 / TICKS as f64, format!("Tick {tick}/{TICKS}")).await;
    }
    Ok(format!("Delayed {delay_ms}ms"))
}

#[cfg(not(debug_assertions))]
async fn test_long_running_delay(_delay_ms: u64, _token: &CancellationToken, _reporter: &mut Reporter<'_>) -> Result<String, CaseGraphError> {
    Err(CaseGraphError::UnsupportedJobType("TestLongRunningDelay".to_string()))
}
