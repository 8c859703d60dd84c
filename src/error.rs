//! Annotation pipeline error types.

use thiserror::Error;

use crate::db::StoreError;
use crate::vision::ApiError;

/// Longest error text stored on a photo.
pub const MAX_ERROR_CHARS: usize = 500;

/// Errors a run can end with. Stage errors stay inside that stage's outcome;
/// the orchestrator turns whatever is left into a `failed` status.
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("image load error: {0}")]
    ImageLoad(String),

    #[error("external API error: {0}")]
    ExternalApi(#[from] ApiError),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("no usable analysis result ({0})")]
    NoUsableResult(String),
}

impl AnnotationError {
    /// Error text as stored in `photos.ai_error`.
    pub fn to_stored_message(&self) -> String {
        truncate_message(&self.to_string())
    }
}

/// Truncate to at most [`MAX_ERROR_CHARS`] characters, never splitting a char.
pub fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_CHARS) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
