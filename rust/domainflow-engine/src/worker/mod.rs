//! Worker registration, heartbeat, liveness, and batch assignment
//!
//! A worker is a long-lived actor identified by a stable `worker_id`. The
//! coordinator upserts its coordination row, runs the heartbeat loop, hands
//! out generation batches one at a time, and sweeps stale workers so their
//! batches become re-assignable.

pub mod coordinator;
pub mod types;

pub use coordinator::{CleanupReport, WorkerCoordinator};
pub use types::{WorkerRecord, WorkerStatus};
