//! Annotation runs: claim, analyze, combine, persist.
//!
//! A run walks a photo through `pending -> processing -> {completed, failed}`.
//! Every run that claims a photo ends in a terminal status; errors are
//! recorded on the photo, never returned to the caller.

pub mod orchestrator;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::analysis::{Annotation, LocalAnalyzer, StageKind, StageOutcome};
use crate::config::Config;
use crate::db::AnnotationStore;
use crate::error::AnnotationError;
use crate::tagging;
use crate::vision::VisionAdapter;

pub use orchestrator::Orchestrator;

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The photo was not pending (already claimed or unknown); nothing changed.
    Skipped,
    Completed { source: StageKind },
    Failed { error: String },
}

/// Executes annotation runs against a store.
pub struct Annotator {
    store: Arc<dyn AnnotationStore>,
    local: Option<LocalAnalyzer>,
    vision: Option<VisionAdapter>,
    shutdown: Arc<AtomicBool>,
}

impl Annotator {
    /// Local analysis only.
    pub fn new(store: Arc<dyn AnnotationStore>) -> Self {
        Self {
            store,
            local: Some(LocalAnalyzer::new()),
            vision: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(store: Arc<dyn AnnotationStore>, config: &Config) -> Self {
        let local = config.analysis.local_enabled.then(LocalAnalyzer::new);
        let vision = if config.analysis.api_enabled {
            let adapter = VisionAdapter::from_config(&config.vision);
            if adapter.is_none() {
                tracing::info!(
                    provider = ?config.vision.provider,
                    "Vision analysis enabled but no provider is available"
                );
            }
            adapter
        } else {
            None
        };

        Self {
            store,
            local,
            vision,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_local(mut self, local: Option<LocalAnalyzer>) -> Self {
        self.local = local;
        self
    }

    pub fn with_vision(mut self, vision: Option<VisionAdapter>) -> Self {
        self.vision = vision;
        self
    }

    /// Once set, runs skip the API stage and finish with what they have.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn vision_provider(&self) -> Option<&'static str> {
        self.vision.as_ref().map(|v| v.provider_name())
    }

    /// Annotate one photo. Never returns an error: anything that goes wrong
    /// after the claim ends the photo in `failed`.
    pub fn run(&self, photo_id: i64, image_path: &Path) -> RunOutcome {
        match self.store.claim_for_processing(photo_id) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(photo_id, "Photo is not pending, skipping run");
                return RunOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(photo_id, error = %e, "Could not claim photo");
                return RunOutcome::Skipped;
            }
        }

        let started = Instant::now();
        let result = self.process(photo_id, image_path).and_then(|source| {
            if self.store.mark_completed(photo_id)? {
                Ok(Some(source))
            } else {
                Ok(None)
            }
        });

        match result {
            Ok(Some(source)) => {
                tracing::info!(
                    photo_id,
                    source = source.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Annotation completed"
                );
                RunOutcome::Completed { source }
            }
            Ok(None) => {
                tracing::warn!(photo_id, "Photo left processing during the run");
                RunOutcome::Skipped
            }
            Err(e) => {
                let message = e.to_stored_message();
                self.record_failure(photo_id, &message);
                RunOutcome::Failed { error: message }
            }
        }
    }

    /// Move a claimed photo to `failed`. Used for run errors and by runners
    /// when a run panics.
    pub fn record_failure(&self, photo_id: i64, message: &str) {
        tracing::warn!(photo_id, error = %message, "Annotation failed");
        match self.store.mark_failed(photo_id, message) {
            Ok(true) => {}
            Ok(false) => tracing::debug!(photo_id, "Photo was not processing, failure not recorded"),
            Err(e) => {
                tracing::error!(photo_id, error = %e, "Could not record annotation failure")
            }
        }
    }

    fn process(&self, photo_id: i64, image_path: &Path) -> Result<StageKind, AnnotationError> {
        let local = self.local.as_ref().map(|analyzer| {
            let outcome = analyzer.analyze(image_path);
            log_stage(photo_id, StageKind::Local, &outcome);
            outcome
        });

        let api = match &self.vision {
            Some(_) if self.is_shutting_down() => {
                tracing::info!(photo_id, "Shutdown requested, skipping vision stage");
                None
            }
            Some(adapter) => {
                let outcome = adapter.analyze(image_path);
                log_stage(photo_id, StageKind::Api, &outcome);
                Some(outcome)
            }
            None => None,
        };

        let annotation = combine(local, api)?;

        self.store
            .save_annotation(photo_id, &annotation.caption, &annotation.colors)?;
        tagging::reconcile(
            &*self.store,
            photo_id,
            &annotation.tags,
            annotation.category.as_deref(),
        )?;

        Ok(annotation.source)
    }
}

fn log_stage(photo_id: i64, stage: StageKind, outcome: &StageOutcome) {
    match outcome {
        Ok(annotation) => tracing::debug!(
            photo_id,
            stage = stage.as_str(),
            tags = annotation.tags.len(),
            "Stage produced a result"
        ),
        Err(e) => tracing::warn!(photo_id, stage = stage.as_str(), error = %e, "Stage failed"),
    }
}

/// Pick the best available result. A usable API result replaces the local
/// one entirely; otherwise the local result stands. With neither, the error
/// names what each stage did.
pub fn combine(local: Option<StageOutcome>, api: Option<StageOutcome>) -> Result<Annotation, AnnotationError> {
    let api_note = match api {
        Some(Ok(annotation)) => return Ok(annotation),
        Some(Err(e)) => e.to_string(),
        None => "not run".to_string(),
    };
    let local_note = match local {
        Some(Ok(annotation)) => return Ok(annotation),
        Some(Err(e)) => e.to_string(),
        None => "disabled".to_string(),
    };

    Err(AnnotationError::NoUsableResult(format!(
        "local: {}; api: {}",
        local_note, api_note
    )))
}
