//! Bounded pool of worker threads running annotation jobs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use super::{AnnotationJob, JobRunner, RunnerError};
use crate::annotate::Annotator;
use crate::db::Database;

/// Runs jobs on `workers` threads fed by a channel, so at most that many
/// runs (and external API calls) are in flight at once.
pub struct InProcessRunner {
    annotator: Arc<Annotator>,
    sender: Mutex<Option<mpsc::Sender<AnnotationJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl InProcessRunner {
    pub fn new(annotator: Arc<Annotator>, workers: usize) -> Self {
        Self::spawn(annotator, workers, None)
    }

    /// Pool fed from `annotation_jobs`: jobs dropped during shutdown are put
    /// back in the table instead of being left pending with no job row.
    pub fn requeuing(annotator: Arc<Annotator>, workers: usize, db: Database) -> Self {
        Self::spawn(annotator, workers, Some(db))
    }

    fn spawn(annotator: Arc<Annotator>, workers: usize, requeue: Option<Database>) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<AnnotationJob>();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|index| {
                let rx = Arc::clone(&rx);
                let annotator = Arc::clone(&annotator);
                let requeue = requeue.clone();
                std::thread::Builder::new()
                    .name(format!("annotate-{}", index))
                    .spawn(move || worker_loop(&annotator, &rx, requeue.as_ref()))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to spawn annotation worker");
                    None
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(workers = handles.len(), "Annotation pool started");

        Self {
            annotator,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    fn close_and_join(&self) {
        // Dropping the sender ends each worker's loop once the channel drains.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("Annotation worker exited abnormally");
            }
        }
    }
}

fn worker_loop(
    annotator: &Annotator,
    jobs: &Mutex<mpsc::Receiver<AnnotationJob>>,
    requeue: Option<&Database>,
) {
    loop {
        let job = match jobs.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        let Ok(job) = job else {
            return;
        };

        if annotator.is_shutting_down() {
            match requeue {
                Some(db) => return_to_queue(db, &job),
                None => {
                    tracing::debug!(photo_id = job.photo_id, "Shutting down, leaving job pending")
                }
            }
            continue;
        }

        run_job(annotator, &job);
    }
}

/// Put an unstarted job back in `annotation_jobs`. A photo already queued
/// again is left alone.
pub(crate) fn return_to_queue(db: &Database, job: &AnnotationJob) {
    match db.enqueue_job(job.photo_id, &job.image_path) {
        Ok(_) => tracing::debug!(photo_id = job.photo_id, "Job returned to queue"),
        Err(e) => tracing::error!(
            photo_id = job.photo_id,
            error = %e,
            "Could not return job to queue, photo stays pending"
        ),
    }
}

/// Run one job, turning a panic into a `failed` status.
pub(crate) fn run_job(annotator: &Annotator, job: &AnnotationJob) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        annotator.run(job.photo_id, &job.image_path)
    }));

    if let Err(payload) = outcome {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        annotator.record_failure(job.photo_id, &format!("annotation run panicked: {}", reason));
    }
}

impl JobRunner for InProcessRunner {
    fn submit(&self, job: AnnotationJob) -> Result<(), RunnerError> {
        if self.annotator.is_shutting_down() {
            return Err(RunnerError::ShutDown);
        }
        let sender = self.sender.lock().map_err(|_| RunnerError::ShutDown)?;
        match sender.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| RunnerError::ShutDown),
            None => Err(RunnerError::ShutDown),
        }
    }

    fn finish(&self) {
        self.close_and_join();
    }

    fn shutdown(&self) {
        self.annotator.request_shutdown();
        self.close_and_join();
    }

    fn name(&self) -> &'static str {
        "in_process"
    }
}

impl Drop for InProcessRunner {
    fn drop(&mut self) {
        self.close_and_join();
    }
}
