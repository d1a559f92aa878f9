#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **casegraph-jobs** – the durable Job Queue & Runner: `Enqueue`,
//! single-reader `Dispatch`, per-`jobType` `Execute` bodies, the progress
//! policy, and cooperative cancellation (`spec.md §4.4`).
//!
//! [`JobQueue::new`] hands back the queue (for `enqueue`/`cancel`/
//! `subscribe`) paired with a [`JobRunner`] that must be driven with
//! [`JobRunner::run`] on its own long-lived task; nothing else may read
//! from the dispatch channel, which is what gives dispatch order its FIFO
//! guarantee (`spec.md §5`).

/// Per-job cancellation registry and the pending-cancel latch.
pub mod cancellation;
/// `Execute`'s per-`jobType` dispatch bodies.
pub mod dispatch;
/// The live `JobInfo` snapshot published to subscribers.
pub mod info;
/// The progress clamp/monotonicity/persist-gating policy.
pub mod progress;
/// `JobQueue`: `Enqueue`, `Cancel`, and the live subscription.
pub mod queue;
/// `JobRunner`: the hosted `dequeue -> execute -> loop` driver.
pub mod runner;
/// Direct `JobRecord`/`EvidenceItemRecord` persistence.
pub mod store;

pub use info::JobInfo;
pub use queue::JobQueue;
pub use runner::JobRunner;
pub use store::abandon_running_jobs;
