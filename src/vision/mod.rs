//! External vision-model stage.

pub mod parse;
pub mod provider;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::analysis::{open_image, Annotation, ScoredTag, StageKind, StageOutcome};
use crate::config::VisionConfig;
use crate::error::AnnotationError;

pub use parse::{normalize_list, parse_reply, VisionReply};
pub use provider::{create_provider, OpenAICompatibleProvider, QwenProvider, VisionProvider};

/// Confidence given to every tag a model returns.
pub const API_TAG_CONFIDENCE: f32 = 0.9;
pub const DEFAULT_CATEGORY: &str = "other";
const JPEG_QUALITY: u8 = 85;

/// Fixed instruction sent with every image.
pub const ANALYSIS_PROMPT: &str = "Analyze this photo and reply with a single JSON object \
containing these fields:\n\
- description: one or two sentences describing the photo\n\
- objects: list of the main objects\n\
- colors: list of the main colors\n\
- mood: the overall mood or atmosphere\n\
- tags: list of short keywords for organizing the photo\n\
- category: one word for the kind of photo (landscape, portrait, food, animal, \
architecture, document, other)\n\
Return ONLY the JSON, no other text.";

/// Failures of a single vision request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("provider refused: {0}")]
    Refusal(String),

    #[error("unusable reply: {0}")]
    Parse(String),
}

/// The API analysis stage: encode, send, parse, normalize.
pub struct VisionAdapter {
    provider: Arc<dyn VisionProvider>,
    max_edge: u32,
}

impl VisionAdapter {
    pub fn new(provider: Arc<dyn VisionProvider>, max_edge: u32) -> Self {
        Self {
            provider,
            max_edge: max_edge.max(1),
        }
    }

    /// `None` when no provider is configured or credentials are missing.
    pub fn from_config(config: &VisionConfig) -> Option<Self> {
        let provider = create_provider(config)?;
        Some(Self::new(Arc::from(provider), config.max_edge))
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn analyze(&self, image_path: &Path) -> StageOutcome {
        let image = load_and_encode_image(image_path, self.max_edge)?;

        tracing::debug!(
            provider = self.provider_name(),
            path = %image_path.display(),
            encoded_bytes = image.len(),
            "Sending image to vision provider"
        );
        let content = self.provider.complete(&image, ANALYSIS_PROMPT)?;
        let reply = parse_reply(&content)?;

        Ok(into_annotation(reply))
    }
}

fn into_annotation(reply: VisionReply) -> Annotation {
    let tags = reply
        .tags
        .into_iter()
        .map(|name| ScoredTag::new(name, API_TAG_CONFIDENCE, StageKind::Api))
        .collect();

    Annotation {
        source: StageKind::Api,
        caption: reply.description,
        colors: reply.colors,
        tags,
        category: Some(
            reply
                .category
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        ),
        mood: reply.mood,
        objects: reply.objects,
        features: None,
    }
}

/// Load an image, resize if either dimension exceeds `max_dimension`,
/// re-encode as JPEG and return it base64-encoded.
fn load_and_encode_image(image_path: &Path, max_dimension: u32) -> Result<String, AnnotationError> {
    let img = open_image(image_path)?;

    let (width, height) = img.dimensions();
    let img = if width > max_dimension || height > max_dimension {
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    // JPEG has no alpha channel.
    let img = image::DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    img.write_with_encoder(encoder).map_err(|e| {
        AnnotationError::ImageLoad(format!("failed to encode {} as JPEG: {}", image_path.display(), e))
    })?;

    Ok(BASE64.encode(buf.into_inner()))
}
