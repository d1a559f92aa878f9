//! Progress policy (`spec.md §4.4`, "Progress policy"), grounded in the
//! delta/interval gating `ProgressReporter::report_progress` uses to decide
//! when an agent's progress is worth re-publishing.
//!
//! `progress` is clamped to `[0, 1]` and monotone non-decreasing within one
//! job's lifetime; callers that try to lower it are silently dropped. A
//! separate, coarser threshold decides whether an advance is also worth a
//! round trip to `JobRecord` versus just republishing the in-memory
//! [`crate::JobInfo`].

use std::time::{Duration, Instant};

/// Minimum progress delta since the last *persisted* value that alone
/// justifies a write.
const MIN_PERSIST_DELTA: f64 = 0.10;

/// Minimum wall-clock gap since the last persist that alone justifies one,
/// regardless of delta.
const MIN_PERSIST_INTERVAL: Duration = Duration::from_millis(300);

/// When only the status message (not the progress value) changed, the
/// shorter gap that still justifies a write.
const MESSAGE_CHANGE_MIN_INTERVAL: Duration = Duration::from_millis(150);

/// `progress` at or above this is treated as "final" for persistence
/// purposes even before the job's terminal transition commits.
const FINAL_THRESHOLD: f64 = 0.999;

/// One accepted advance, with the verdict on whether it also crosses the
/// persist threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub status_message: String,
    pub should_persist: bool,
}

/// Per-job progress state. One instance lives for the duration of a single
/// `Execute` call.
pub struct ProgressTracker {
    last_progress: f64,
    last_persisted_progress: f64,
    last_persist_time: Instant,
    last_status_message: String,
    warned_dropped: bool,
}

impl ProgressTracker {
    /// A fresh tracker, primed so the very first call always persists.
    pub fn new() -> Self {
        Self {
            last_progress: 0.0,
            last_persisted_progress: -1.0,
            last_persist_time: Instant::now() - MIN_PERSIST_INTERVAL,
            last_status_message: String::new(),
            warned_dropped: false,
        }
    }

    /// Offer a new `(progress, status_message)` pair. Returns `None` if the
    /// attempt is dropped outright: a lower progress value, or neither the
    /// progress nor the message actually changed.
    pub fn record(&mut self, progress: f64, status_message: impl Into<String>) -> Option<ProgressUpdate> {
        let clamped = progress.clamp(0.0, 1.0);
        if clamped < self.last_progress {
            return None;
        }
        let status_message = status_message.into();
        let progress_advanced = clamped > self.last_progress;
        let message_changed = status_message != self.last_status_message;
        if !progress_advanced && !message_changed {
            return None;
        }

        self.last_progress = clamped;
        self.last_status_message = status_message.clone();

        let now = Instant::now();
        let is_final = clamped >= FINAL_THRESHOLD;
        let delta_since_persist = clamped - self.last_persisted_progress;
        let elapsed_since_persist = now.duration_since(self.last_persist_time);

        let should_persist = is_final
            || delta_since_persist >= MIN_PERSIST_DELTA
            || elapsed_since_persist >= MIN_PERSIST_INTERVAL
            || (message_changed && elapsed_since_persist >= MESSAGE_CHANGE_MIN_INTERVAL);

        if should_persist {
            self.last_persisted_progress = clamped;
            self.last_persist_time = now;
        }

        Some(ProgressUpdate {
            progress: clamped,
            status_message,
            should_persist,
        })
    }

    /// Record that a persist attempt failed. Returns `true` only the first
    /// time this is called for the tracker's lifetime, so the caller emits
    /// exactly one `JobProgressUpdateDropped` warning per job.
    pub fn note_persist_failed(&mut self) -> bool {
        if self.warned_dropped {
            false
        } else {
            self.warned_dropped = true;
            true
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_a_lower_progress_value() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.record(0.5, "halfway").is_some());
        assert!(tracker.record(0.3, "regressed").is_none());
    }

    #[test]
    fn clamps_out_of_range_progress() {
        let mut tracker = ProgressTracker::new();
        let update = tracker.record(1.5, "done").unwrap();
        assert_eq!(update.progress, 1.0);
    }

    #[test]
    fn final_progress_always_persists() {
        let mut tracker = ProgressTracker::new();
        tracker.record(0.2, "working").unwrap();
        let update = tracker.record(1.0, "Succeeded: done").unwrap();
        assert!(update.should_persist);
    }

    #[test]
    fn small_delta_within_interval_does_not_persist() {
        let mut tracker = ProgressTracker::new();
        tracker.record(0.01, "starting").unwrap();
        let update = tracker.record(0.02, "starting").unwrap();
        assert!(!update.should_persist);
    }

    #[test]
    fn large_delta_persists_immediately() {
        let mut tracker = ProgressTracker::new();
        tracker.record(0.01, "starting").unwrap();
        let update = tracker.record(0.2, "starting").unwrap();
        assert!(update.should_persist);
    }

    #[test]
    fn warns_only_once_per_job() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.note_persist_failed());
        assert!(!tracker.note_persist_failed());
    }
}
