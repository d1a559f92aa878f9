//! `JobInfo` – the lightweight snapshot published to live subscribers on
//! every state/progress transition, so a UI shell can keep a job list in
//! sync without repolling `JobRecord` (expansion of `spec.md §4.4`).

use chrono::{DateTime, Utc};

use casegraph_types::ids::{CaseId, EvidenceItemId, JobId};
use casegraph_types::model::{Job, JobStatus};

/// A point-in-time view of one job's mutable fields.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInfo {
    pub job_id: JobId,
    pub status: JobStatus,
    pub job_type: String,
    pub case_id: Option<CaseId>,
    pub evidence_item_id: Option<EvidenceItemId>,
    pub progress: f64,
    pub status_message: String,
    pub error_message: Option<String>,
    pub started_at_utc: Option<DateTime<Utc>>,
    pub completed_at_utc: Option<DateTime<Utc>>,
}

impl From<&Job> for JobInfo {
    fn from(job: &Job) -> Self {
        JobInfo {
            job_id: job.job_id,
            status: job.status,
            job_type: job.job_type.clone(),
            case_id: job.case_id,
            evidence_item_id: job.evidence_item_id,
            progress: job.progress,
            status_message: job.status_message.clone(),
            error_message: job.error_message.clone(),
            started_at_utc: job.started_at_utc,
            completed_at_utc: job.completed_at_utc,
        }
    }
}
