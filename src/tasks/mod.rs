//! Background execution of annotation runs.
//!
//! Submitting a photo never blocks on analysis: a [`JobRunner`] either hands
//! the job to a bounded pool of worker threads in this process
//! ([`InProcessRunner`]) or records it in the `annotation_jobs` table for the
//! daemon to pick up ([`QueueRunner`] + [`QueueWorker`]).

pub mod pool;
pub mod queue;

use std::path::PathBuf;
use thiserror::Error;

use crate::db::{QueuedJob, StoreError};

pub use pool::InProcessRunner;
pub use queue::{QueueRunner, QueueWorker};

/// One photo to annotate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationJob {
    pub photo_id: i64,
    pub image_path: PathBuf,
}

impl AnnotationJob {
    pub fn new(photo_id: i64, image_path: impl Into<PathBuf>) -> Self {
        Self {
            photo_id,
            image_path: image_path.into(),
        }
    }
}

impl From<QueuedJob> for AnnotationJob {
    fn from(job: QueuedJob) -> Self {
        Self::new(job.photo_id, job.image_path)
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("runner is shutting down")]
    ShutDown,

    #[error("could not queue job: {0}")]
    Store(#[from] StoreError),
}

/// Schedules annotation runs. `submit` returns as soon as the job is handed
/// off; the run's outcome is only observable through the photo's status.
pub trait JobRunner: Send + Sync {
    fn submit(&self, job: AnnotationJob) -> Result<(), RunnerError>;

    /// Stop accepting jobs and wait for the ones already handed off.
    fn finish(&self);

    /// Like [`finish`](JobRunner::finish), but runs still in flight skip their
    /// API stage and jobs that were never claimed stay `pending`.
    fn shutdown(&self);

    /// Get the runner name for display
    fn name(&self) -> &'static str;
}
