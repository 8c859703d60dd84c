use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Annotator, RunOutcome};
use crate::config::{Config, RunnerKind};
use crate::db::Database;
use crate::tasks::{AnnotationJob, InProcessRunner, JobRunner, QueueRunner};

/// Entry point for the upload path: hands photos to a runner and returns.
pub struct Orchestrator {
    annotator: Arc<Annotator>,
    runner: Box<dyn JobRunner>,
}

impl Orchestrator {
    pub fn new(annotator: Arc<Annotator>, runner: Box<dyn JobRunner>) -> Self {
        Self { annotator, runner }
    }

    /// Wire up the analyzers and the configured runner against `db`.
    pub fn from_config(db: Database, config: &Config) -> Self {
        let annotator = Arc::new(Annotator::from_config(Arc::new(db.clone()), config));
        let runner: Box<dyn JobRunner> = match config.pipeline.runner {
            RunnerKind::InProcess => Box::new(InProcessRunner::new(
                Arc::clone(&annotator),
                config.pipeline.max_concurrency,
            )),
            RunnerKind::Queue => Box::new(QueueRunner::new(db)),
        };

        tracing::info!(
            runner = runner.name(),
            local = config.analysis.local_enabled,
            vision = annotator.vision_provider().unwrap_or("none"),
            "Annotation pipeline ready"
        );

        Self { annotator, runner }
    }

    pub fn runner_name(&self) -> &'static str {
        self.runner.name()
    }

    /// Schedule annotation of a stored photo and return immediately.
    /// Scheduling problems are logged; the photo then stays `pending`.
    pub fn submit(&self, photo_id: i64, image_path: impl Into<PathBuf>) {
        let job = AnnotationJob::new(photo_id, image_path);
        if let Err(e) = self.runner.submit(job) {
            tracing::warn!(photo_id, error = %e, "Could not schedule annotation");
        }
    }

    /// Annotate synchronously on the calling thread.
    pub fn run(&self, photo_id: i64, image_path: &Path) -> RunOutcome {
        self.annotator.run(photo_id, image_path)
    }

    /// Wait for submitted work to finish.
    pub fn finish(&self) {
        self.runner.finish();
    }

    pub fn shutdown(&self) {
        self.annotator.request_shutdown();
        self.runner.shutdown();
    }
}
