//! End-to-end annotation runs against a real SQLite store.

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use momento::analysis::StageKind;
use momento::annotate::{Annotator, RunOutcome};
use momento::db::{
    AiStatus, BoundingBox, Database, PhotoStore, StoreError, StoreResult, Tag, TagSource, TagStore,
};
use momento::tasks::{AnnotationJob, InProcessRunner, JobRunner};
use momento::vision::{ApiError, VisionAdapter, VisionProvider};

struct Fixture {
    dir: tempfile::TempDir,
    db: Database,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("momento.db")).unwrap();
        db.initialize().unwrap();
        Self { dir, db }
    }

    fn image(&self, name: &str, width: u32, height: u32, color: [u8; 3]) -> PathBuf {
        let path = self.dir.path().join(name);
        RgbImage::from_pixel(width, height, Rgb(color)).save(&path).unwrap();
        path
    }

    fn photo(&self, path: &Path) -> i64 {
        self.db.insert_photo(path).unwrap()
    }

    fn store(&self) -> Arc<Database> {
        Arc::new(self.db.clone())
    }

    fn tag_names(&self, photo_id: i64) -> Vec<String> {
        let mut names: Vec<String> = self
            .db
            .get_photo_tags(photo_id)
            .unwrap()
            .into_iter()
            .map(|t| t.tag.name)
            .collect();
        names.sort();
        names
    }
}

/// Vision provider double: a canned reply, a canned error, or a panic.
enum Reply {
    Text(&'static str),
    Timeout,
    Panic,
}

struct StubProvider {
    reply: Reply,
    calls: AtomicUsize,
}

impl StubProvider {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VisionProvider for StubProvider {
    fn complete(&self, _image_base64: &str, _prompt: &str) -> Result<String, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Reply::Text(text) => Ok(text.to_string()),
            Reply::Timeout => Err(ApiError::Timeout(Duration::from_secs(30))),
            Reply::Panic => panic!("provider exploded"),
        }
    }

    fn provider_name(&self) -> &'static str {
        "stub"
    }
}

fn with_vision(annotator: Annotator, provider: &Arc<StubProvider>) -> Annotator {
    let provider: Arc<dyn VisionProvider> = provider.clone();
    annotator.with_vision(Some(VisionAdapter::new(provider, 1024)))
}

#[test]
fn landscape_red_with_local_analysis_only() {
    let fx = Fixture::new();
    let path = fx.image("landscape_red.jpg", 1600, 900, [200, 30, 30]);
    let id = fx.photo(&path);

    let annotator = Annotator::new(fx.store());
    assert_eq!(
        annotator.run(id, &path),
        RunOutcome::Completed {
            source: StageKind::Local
        }
    );

    let photo = fx.db.get_photo(id).unwrap().unwrap();
    assert_eq!(photo.ai_status, AiStatus::Completed);
    assert!(photo.ai_error.is_none());
    assert_eq!(photo.dominant_colors.len(), 5);
    let caption = photo.caption.unwrap();
    assert!(caption.starts_with("Landscape photo, dominant color red"), "{}", caption);
    assert!(caption.ends_with("1600x900"));

    let tags = fx.tag_names(id);
    assert!(tags.contains(&"landscape".to_string()));
    assert!(tags.contains(&"red".to_string()));
    assert!(tags.contains(&"simple".to_string()));
    assert!(fx
        .db
        .get_photo_tags(id)
        .unwrap()
        .iter()
        .all(|t| t.source == TagSource::Ai));
}

#[test]
fn missing_file_fails_without_writing_annotation() {
    let fx = Fixture::new();
    let path = fx.dir.path().join("missing.jpg");
    let id = fx.photo(&path);

    let provider = StubProvider::new(Reply::Text(r#"{"description": "never sent"}"#));
    let annotator = with_vision(Annotator::new(fx.store()), &provider);

    let outcome = annotator.run(id, &path);
    assert!(matches!(outcome, RunOutcome::Failed { .. }));
    assert_eq!(provider.calls(), 0);

    let photo = fx.db.get_photo(id).unwrap().unwrap();
    assert_eq!(photo.ai_status, AiStatus::Failed);
    let error = photo.ai_error.unwrap();
    assert!(!error.is_empty());
    assert!(error.contains("image load error"));
    assert!(photo.caption.is_none());
    assert!(photo.dominant_colors.is_empty());
    assert!(fx.tag_names(id).is_empty());
}

#[test]
fn tag_string_and_list_reconcile_identically() {
    let fx = Fixture::new();
    let path = fx.image("pets.png", 64, 64, [120, 120, 120]);

    let mut results = Vec::new();
    for reply in [
        r#"{"description": "Pets", "tags": "cat, dog"}"#,
        r#"```json
{"description": "Pets", "tags": ["cat", "dog"]}
```"#,
    ] {
        let id = fx.photo(&path);
        let provider = StubProvider::new(Reply::Text(reply));
        let annotator = with_vision(Annotator::new(fx.store()), &provider);
        annotator.run(id, &path);
        results.push(fx.tag_names(id));
    }

    assert_eq!(results[0], vec!["cat", "dog"]);
    assert_eq!(results[0], results[1]);
    assert_eq!(fx.db.find_tag("cat").unwrap().unwrap().use_count, 2);
}

#[test]
fn concurrent_runs_claim_once() {
    let fx = Fixture::new();
    let path = fx.image("claimed.png", 40, 40, [30, 30, 200]);
    let id = fx.photo(&path);
    let annotator = Arc::new(Annotator::new(fx.store()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let annotator = Arc::clone(&annotator);
            let path = path.clone();
            std::thread::spawn(move || annotator.run(id, &path))
        })
        .collect();
    let outcomes: Vec<RunOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let executed = outcomes
        .iter()
        .filter(|o| !matches!(o, RunOutcome::Skipped))
        .count();
    assert_eq!(executed, 1);
    assert_eq!(fx.db.get_photo(id).unwrap().unwrap().ai_status, AiStatus::Completed);
}

#[test]
fn terminal_status_is_never_left() {
    let fx = Fixture::new();
    let good = fx.image("good.png", 32, 32, [10, 200, 10]);
    let bad = fx.dir.path().join("gone.png");
    let annotator = Annotator::new(fx.store());

    for path in [&good, &bad] {
        let id = fx.photo(path);
        let first = annotator.run(id, path);
        assert_ne!(first, RunOutcome::Skipped);
        let status = fx.db.get_photo(id).unwrap().unwrap().ai_status;
        assert!(matches!(status, AiStatus::Completed | AiStatus::Failed));

        assert_eq!(annotator.run(id, path), RunOutcome::Skipped);
        assert_eq!(fx.db.get_photo(id).unwrap().unwrap().ai_status, status);
    }
}

#[test]
fn api_result_supersedes_local() {
    let fx = Fixture::new();
    let path = fx.image("wide.png", 320, 160, [200, 30, 30]);
    let id = fx.photo(&path);

    let provider = StubProvider::new(Reply::Text(
        r#"{"description": "B", "colors": ["crimson"], "tags": ["barn"], "category": "building"}"#,
    ));
    let annotator = with_vision(Annotator::new(fx.store()), &provider);

    assert_eq!(
        annotator.run(id, &path),
        RunOutcome::Completed {
            source: StageKind::Api
        }
    );
    let photo = fx.db.get_photo(id).unwrap().unwrap();
    assert_eq!(photo.caption.as_deref(), Some("B"));
    assert_eq!(photo.dominant_colors, vec!["crimson"]);
    // API tags replace local ones
    assert_eq!(fx.tag_names(id), vec!["barn"]);
    assert_eq!(fx.db.find_tag("barn").unwrap().unwrap().category, "building");
}

#[test]
fn failing_api_degrades_to_local() {
    let fx = Fixture::new();
    let path = fx.image("tall.png", 100, 300, [240, 240, 240]);
    let id = fx.photo(&path);

    let provider = StubProvider::new(Reply::Timeout);
    let annotator = with_vision(Annotator::new(fx.store()), &provider);

    assert_eq!(
        annotator.run(id, &path),
        RunOutcome::Completed {
            source: StageKind::Local
        }
    );
    assert_eq!(provider.calls(), 1);
    let photo = fx.db.get_photo(id).unwrap().unwrap();
    assert_eq!(photo.ai_status, AiStatus::Completed);
    assert!(photo.caption.unwrap().starts_with("Portrait photo, dominant color white"));
    assert!(fx.tag_names(id).contains(&"portrait".to_string()));
}

#[test]
fn prose_refusal_keeps_local_result() {
    let fx = Fixture::new();
    let path = fx.image("wide.png", 320, 160, [200, 30, 30]);
    let id = fx.photo(&path);

    let provider = StubProvider::new(Reply::Text("I'm sorry, I can't help with that."));
    let annotator = with_vision(Annotator::new(fx.store()), &provider);

    assert_eq!(
        annotator.run(id, &path),
        RunOutcome::Completed {
            source: StageKind::Local
        }
    );
    let photo = fx.db.get_photo(id).unwrap().unwrap();
    assert!(photo.caption.unwrap().starts_with("Landscape photo, dominant color red"));
    assert!(fx.tag_names(id).contains(&"landscape".to_string()));
}

#[test]
fn failing_api_without_local_fails() {
    let fx = Fixture::new();
    let path = fx.image("any.png", 50, 50, [0, 0, 0]);
    let id = fx.photo(&path);

    let provider = StubProvider::new(Reply::Timeout);
    let annotator = with_vision(Annotator::new(fx.store()).with_local(None), &provider);

    match annotator.run(id, &path) {
        RunOutcome::Failed { error } => {
            assert!(error.contains("local: disabled"));
            assert!(error.contains("timed out"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(fx.db.get_photo(id).unwrap().unwrap().ai_status, AiStatus::Failed);
}

#[test]
fn both_stages_disabled_fails_explicitly() {
    let fx = Fixture::new();
    let path = fx.image("idle.png", 8, 8, [1, 2, 3]);
    let id = fx.photo(&path);
    let annotator = Annotator::new(fx.store()).with_local(None);

    assert!(matches!(annotator.run(id, &path), RunOutcome::Failed { .. }));
    let photo = fx.db.get_photo(id).unwrap().unwrap();
    assert_eq!(photo.ai_status, AiStatus::Failed);
    assert!(photo.ai_error.unwrap().starts_with("no usable analysis result"));
}

#[test]
fn shutdown_skips_vision_stage() {
    let fx = Fixture::new();
    let path = fx.image("late.png", 64, 64, [20, 40, 220]);
    let id = fx.photo(&path);

    let provider = StubProvider::new(Reply::Text(r#"{"description": "unused"}"#));
    let annotator = with_vision(Annotator::new(fx.store()), &provider);
    annotator.request_shutdown();

    assert_eq!(
        annotator.run(id, &path),
        RunOutcome::Completed {
            source: StageKind::Local
        }
    );
    assert_eq!(provider.calls(), 0);
}

#[test]
fn panicking_run_is_recorded_as_failed() {
    let fx = Fixture::new();
    let path = fx.image("boom.png", 16, 16, [9, 9, 9]);
    let id = fx.photo(&path);

    let provider = StubProvider::new(Reply::Panic);
    let annotator = Arc::new(with_vision(Annotator::new(fx.store()), &provider));
    let runner = InProcessRunner::new(annotator, 1);
    runner.submit(AnnotationJob::new(id, &path)).unwrap();
    runner.finish();

    let photo = fx.db.get_photo(id).unwrap().unwrap();
    assert_eq!(photo.ai_status, AiStatus::Failed);
    assert!(photo.ai_error.unwrap().contains("provider exploded"));
}

/// Store that delegates to SQLite but refuses to save annotations.
struct BrokenSaves(Database);

impl PhotoStore for BrokenSaves {
    fn claim_for_processing(&self, photo_id: i64) -> StoreResult<bool> {
        self.0.claim_for_processing(photo_id)
    }

    fn save_annotation(&self, _photo_id: i64, _caption: &str, _colors: &[String]) -> StoreResult<()> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }

    fn mark_completed(&self, photo_id: i64) -> StoreResult<bool> {
        self.0.mark_completed(photo_id)
    }

    fn mark_failed(&self, photo_id: i64, error: &str) -> StoreResult<bool> {
        self.0.mark_failed(photo_id, error)
    }
}

impl TagStore for BrokenSaves {
    fn resolve_alias(&self, name: &str) -> StoreResult<Option<String>> {
        self.0.resolve_alias(name)
    }

    fn find_tag(&self, name: &str) -> StoreResult<Option<Tag>> {
        self.0.find_tag(name)
    }

    fn create_tag(&self, name: &str, category: &str) -> StoreResult<(Tag, bool)> {
        self.0.create_tag(name, category)
    }

    fn link_photo_tag(
        &self,
        photo_id: i64,
        tag_id: i64,
        source: TagSource,
        confidence: f32,
        bbox: Option<BoundingBox>,
    ) -> StoreResult<bool> {
        self.0.link_photo_tag(photo_id, tag_id, source, confidence, bbox)
    }
}

#[test]
fn persistence_error_is_recorded_as_failed() {
    let fx = Fixture::new();
    let path = fx.image("ok.png", 32, 32, [200, 200, 0]);
    let id = fx.photo(&path);
    let annotator = Annotator::new(Arc::new(BrokenSaves(fx.db.clone())));

    match annotator.run(id, &path) {
        RunOutcome::Failed { error } => assert!(error.contains("disk full")),
        other => panic!("expected failure, got {:?}", other),
    }
    let photo = fx.db.get_photo(id).unwrap().unwrap();
    assert_eq!(photo.ai_status, AiStatus::Failed);
    assert!(photo.ai_error.unwrap().starts_with("persistence error"));
}
