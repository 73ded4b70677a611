//! Job Queue
//!
//! In-memory queue for chat generation jobs:
//!
//! - [`jobs`]: job records, lifecycle states and payload snapshots
//! - [`registry`]: status bookkeeping shared by workers and status readers
//! - [`channel`]: per-job result channels carrying stream events
//! - [`workers`]: the bounded worker pool that runs producers
//! - [`service`]: submission, status, streaming and shutdown
//!
//! ```text
//! submit ──► registry (Queued) ──► pending queue ──► worker (Processing)
//!                                                      │
//!                       producer events ──► ResultWriter ──► ResultReader ──► SSE
//!                                                      │
//!                                       registry (Completed | Failed | Cancelled)
//! ```

pub mod channel;
pub mod jobs;
pub mod registry;
pub mod service;
pub mod workers;

pub use channel::{ChannelError, ResultChannels, ResultReader, ResultWriter};
pub use jobs::{ChatPayload, Job, JobFailure, JobId, JobPayload, JobSnapshot, JobStatus, TaskType};
pub use registry::{JobCounts, JobRegistry};
pub use service::{QueueService, QueueSettings, QueueStats};
pub use workers::Worker;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {0} is already being streamed")]
    AlreadyStreaming(JobId),

    #[error("Job queue is full ({0} pending jobs)")]
    QueueFull(usize),

    #[error("Queue is shutting down")]
    ShuttingDown,

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

impl From<ChannelError> for QueueError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::AlreadyAttached(id) => QueueError::AlreadyStreaming(id),
            ChannelError::NotFound(id)
            | ChannelError::Closed(id)
            | ChannelError::Full { job_id: id, .. } => QueueError::NotFound(id),
        }
    }
}
