//! Job runner backed by the `annotation_jobs` table.

use std::sync::Arc;

use super::pool::return_to_queue;
use super::{AnnotationJob, InProcessRunner, JobRunner, RunnerError};
use crate::db::Database;

/// Records jobs for a separate process to run. Submitting a photo that is
/// already queued is a no-op.
pub struct QueueRunner {
    db: Database,
}

impl QueueRunner {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl JobRunner for QueueRunner {
    fn submit(&self, job: AnnotationJob) -> Result<(), RunnerError> {
        let queued = self.db.enqueue_job(job.photo_id, &job.image_path)?;
        if !queued {
            tracing::debug!(photo_id = job.photo_id, "Photo already queued");
        }
        Ok(())
    }

    // Nothing runs in this process.
    fn finish(&self) {}

    fn shutdown(&self) {}

    fn name(&self) -> &'static str {
        "queue"
    }
}

/// Moves queued jobs into an in-process pool.
pub struct QueueWorker {
    db: Database,
    pool: Arc<InProcessRunner>,
    batch_size: usize,
}

impl QueueWorker {
    pub fn new(db: Database, pool: Arc<InProcessRunner>, batch_size: usize) -> Self {
        Self {
            db,
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Dequeue up to one batch and hand it to the pool. Returns how many jobs
    /// were handed off. Jobs the pool refuses go back in the queue.
    pub fn drain(&self) -> Result<usize, RunnerError> {
        let jobs = self.db.dequeue_jobs(self.batch_size)?;
        let mut submitted = 0;
        for job in jobs {
            let job = AnnotationJob::from(job);
            match self.pool.submit(job.clone()) {
                Ok(()) => submitted += 1,
                Err(e) => {
                    tracing::warn!(photo_id = job.photo_id, error = %e, "Could not hand queued job to pool");
                    return_to_queue(&self.db, &job);
                }
            }
        }
        if submitted > 0 {
            tracing::info!(jobs = submitted, "Drained annotation queue");
        }
        Ok(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::Annotator;
    use crate::db::AiStatus;
    use crate::vision::{ApiError, VisionAdapter, VisionProvider};
    use image::{Rgb, RgbImage};
    use std::sync::{mpsc, Mutex};

    /// Holds the first API call open until the test releases it.
    struct GatedProvider {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl VisionProvider for GatedProvider {
        fn complete(&self, _image_base64: &str, _prompt: &str) -> Result<String, ApiError> {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            Ok(r#"{"description": "held open"}"#.to_string())
        }

        fn provider_name(&self) -> &'static str {
            "gated"
        }
    }

    #[test]
    fn test_queue_then_drain() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("momento.db")).unwrap();
        db.initialize().unwrap();
        let image = dir.path().join("blue.png");
        RgbImage::from_pixel(32, 32, Rgb([20, 40, 220])).save(&image).unwrap();

        let runner = QueueRunner::new(db.clone());
        let a = db.insert_photo(&image).unwrap();
        let b = db.insert_photo(&image).unwrap();
        runner.submit(AnnotationJob::new(a, &image)).unwrap();
        runner.submit(AnnotationJob::new(a, &image)).unwrap();
        runner.submit(AnnotationJob::new(b, &image)).unwrap();
        assert_eq!(db.queued_job_count().unwrap(), 2);
        // Queuing alone does not run anything.
        assert_eq!(db.get_photo(a).unwrap().unwrap().ai_status, AiStatus::Pending);

        let annotator = Arc::new(Annotator::new(Arc::new(db.clone())));
        let pool = Arc::new(InProcessRunner::new(annotator, 2));
        let worker = QueueWorker::new(db.clone(), Arc::clone(&pool), 10);

        assert_eq!(worker.drain().unwrap(), 2);
        assert_eq!(worker.drain().unwrap(), 0);
        pool.finish();

        for id in [a, b] {
            assert_eq!(db.get_photo(id).unwrap().unwrap().ai_status, AiStatus::Completed);
        }
    }

    #[test]
    fn test_shutdown_returns_unstarted_jobs_to_queue() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("momento.db")).unwrap();
        db.initialize().unwrap();
        let image = dir.path().join("red.png");
        RgbImage::from_pixel(32, 32, Rgb([200, 30, 30])).save(&image).unwrap();

        let ids: Vec<i64> = (0..3)
            .map(|_| {
                let id = db.insert_photo(&image).unwrap();
                db.enqueue_job(id, &image).unwrap();
                id
            })
            .collect();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let provider = Arc::new(GatedProvider {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let annotator = Arc::new(
            Annotator::new(Arc::new(db.clone()))
                .with_vision(Some(VisionAdapter::new(provider, 1024))),
        );
        let pool = Arc::new(InProcessRunner::requeuing(Arc::clone(&annotator), 1, db.clone()));
        let worker = QueueWorker::new(db.clone(), Arc::clone(&pool), 10);

        assert_eq!(worker.drain().unwrap(), 3);
        assert_eq!(db.queued_job_count().unwrap(), 0);

        // The only worker is inside the first job's API call; the rest wait.
        entered_rx.recv().unwrap();
        annotator.request_shutdown();
        release_tx.send(()).unwrap();
        pool.shutdown();

        assert_eq!(db.get_photo(ids[0]).unwrap().unwrap().ai_status, AiStatus::Completed);
        for &id in &ids[1..] {
            assert_eq!(db.get_photo(id).unwrap().unwrap().ai_status, AiStatus::Pending);
        }
        assert_eq!(db.queued_job_count().unwrap(), 2);

        // A drain after shutdown hands nothing off and loses nothing.
        assert_eq!(worker.drain().unwrap(), 0);
        assert_eq!(db.queued_job_count().unwrap(), 2);
    }
}
