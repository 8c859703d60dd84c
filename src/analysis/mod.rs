//! Image analysis stages and the result shape they share.

pub mod colors;
pub mod local;

use image::{DynamicImage, ImageReader};
use serde::Serialize;
use std::path::Path;

use crate::error::AnnotationError;

pub use colors::{extract_dominant_colors, DEFAULT_PALETTE_SIZE};
pub use local::{ImageFeatures, LocalAnalyzer, Orientation};

/// Decode an image from disk, picking the decoder from the file's leading
/// bytes rather than its extension.
pub fn open_image(path: &Path) -> Result<DynamicImage, AnnotationError> {
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| AnnotationError::ImageLoad(format!("{}: {}", path.display(), e)))?
        .decode()
        .map_err(|e| AnnotationError::ImageLoad(format!("{}: {}", path.display(), e)))
}

/// Which stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Local,
    Api,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Local => "local",
            StageKind::Api => "api",
        }
    }
}

/// A machine-produced tag before reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredTag {
    pub name: String,
    pub confidence: f32,
    pub source: StageKind,
}

impl ScoredTag {
    pub fn new(name: impl Into<String>, confidence: f32, source: StageKind) -> Self {
        Self {
            name: name.into(),
            confidence,
            source,
        }
    }
}

/// Successful output of one analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub source: StageKind,
    pub caption: String,
    pub colors: Vec<String>,
    pub tags: Vec<ScoredTag>,
    pub category: Option<String>,
    pub mood: Option<String>,
    pub objects: Vec<String>,
    pub features: Option<ImageFeatures>,
}

/// Outcome of a stage: a usable annotation, or the error that stage hit.
pub type StageOutcome = Result<Annotation, AnnotationError>;
