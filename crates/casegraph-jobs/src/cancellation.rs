//! Per-job cancellation bookkeeping (`spec.md §4.4`, "Cancellation"): the
//! registry of live tokens a `Cancel` call targets, and the pending-cancel
//! latch for a job that has been accepted but not yet reached `Execute`.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use casegraph_types::cancellation::CancellationToken;
use casegraph_types::ids::JobId;

/// Outcome of a [`CancellationRegistry::request_cancel`] call, mirroring
/// the decision table in `spec.md §4.4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelEffect {
    /// The job's token was live and has now been signalled.
    TokenCancelled,
    /// No token yet; the request was latched for the runner to consume at
    /// registration.
    Pending,
}

/// Tracks one [`CancellationToken`] per in-flight job, plus a latch for
/// cancel requests that arrived before `Execute` registered the token.
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    pending: Mutex<HashSet<JobId>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job_id`'s token at the start of `Execute`. If a cancel
    /// was already pending, consumes the latch and cancels the token
    /// immediately before returning it.
    pub fn register(&self, job_id: JobId, token: CancellationToken) -> CancellationToken {
        let had_pending = self.pending.lock().expect("cancellation pending mutex poisoned").remove(&job_id);
        if had_pending {
            token.cancel();
        }
        self.tokens.lock().expect("cancellation token map mutex poisoned").insert(job_id, token.clone());
        token
    }

    /// Drop `job_id`'s token once the job reaches a terminal state.
    pub fn unregister(&self, job_id: JobId) {
        self.tokens.lock().expect("cancellation token map mutex poisoned").remove(&job_id);
    }

    /// `true` if `job_id` currently has a registered, live token (i.e. is
    /// `Running` and past `Execute`'s registration point).
    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.tokens.lock().expect("cancellation token map mutex poisoned").contains_key(&job_id)
    }

    /// Request cancellation of `job_id`. If its token is registered,
    /// cancels it directly; otherwise latches the request for the runner
    /// to consume at registration.
    pub fn request_cancel(&self, job_id: JobId) -> CancelEffect {
        if let Some(token) = self.tokens.lock().expect("cancellation token map mutex poisoned").get(&job_id) {
            token.cancel();
            return CancelEffect::TokenCancelled;
        }
        self.pending.lock().expect("cancellation pending mutex poisoned").insert(job_id);
        CancelEffect::Pending
    }

    /// Clear a stale pending latch, e.g. once a `Queued` job has been
    /// marked `Canceled` directly without ever reaching `Execute`.
    pub fn clear_pending(&self, job_id: JobId) {
        self.pending.lock().expect("cancellation pending mutex poisoned").remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn cancel_before_registration_is_consumed_at_registration() {
        let registry = CancellationRegistry::new();
        let job_id = Uuid::new_v4();

        assert_eq!(registry.request_cancel(job_id), CancelEffect::Pending);

        let token = registry.register(job_id, CancellationToken::new());
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_after_registration_cancels_the_live_token() {
        let registry = CancellationRegistry::new();
        let job_id = Uuid::new_v4();
        let token = registry.register(job_id, CancellationToken::new());

        assert_eq!(registry.request_cancel(job_id), CancelEffect::TokenCancelled);
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_with_no_token_and_no_job_latches_pending() {
        let registry = CancellationRegistry::new();
        let job_id = Uuid::new_v4();
        assert_eq!(registry.request_cancel(job_id), CancelEffect::Pending);
    }
}
