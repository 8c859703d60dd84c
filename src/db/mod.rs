pub mod queue;
mod schema;
pub mod sqlite;
pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use queue::QueuedJob;
pub use schema::SCHEMA;
pub use sqlite::Database;
pub use store::{AnnotationStore, PhotoStore, TagStore};

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Annotation state of a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiStatus::Pending => "pending",
            AiStatus::Processing => "processing",
            AiStatus::Completed => "completed",
            AiStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AiStatus::Pending),
            "processing" => Ok(AiStatus::Processing),
            "completed" => Ok(AiStatus::Completed),
            "failed" => Ok(AiStatus::Failed),
            other => Err(StoreError::InvalidValue {
                column: "ai_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Who asserted a photo/tag association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagSource {
    Ai,
    Manual,
}

impl TagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagSource::Ai => "ai",
            TagSource::Manual => "manual",
        }
    }
}

impl FromStr for TagSource {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(TagSource::Ai),
            "manual" => Ok(TagSource::Manual),
            other => Err(StoreError::InvalidValue {
                column: "source",
                value: other.to_string(),
            }),
        }
    }
}

/// A photo as seen by the annotation pipeline.
#[derive(Debug, Clone)]
pub struct PhotoRecord {
    pub id: i64,
    pub storage_path: String,
    pub filename: String,
    pub caption: Option<String>,
    pub dominant_colors: Vec<String>,
    pub ai_status: AiStatus,
    pub ai_error: Option<String>,
    pub ai_updated_at: Option<String>,
}

/// Canonical vocabulary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub use_count: i64,
}

/// Bounding box as `[x, y, w, h]`, in whatever units the producer used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox(pub [f32; 4]);

/// A tag attached to a photo, joined with its vocabulary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoTag {
    pub tag: Tag,
    pub source: TagSource,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}
