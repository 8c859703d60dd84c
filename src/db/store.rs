//! Store traits consumed by the annotation pipeline.
//!
//! The orchestrator and the tag reconciler only talk to the relational store
//! through these traits, so they can run against the SQLite [`Database`] or a
//! test double. Every call is its own short-lived unit of work; no locks or
//! transactions are held across calls.
//!
//! [`Database`]: super::Database

use super::{BoundingBox, StoreResult, Tag, TagSource};

/// Photo status and annotation writes.
pub trait PhotoStore: Send + Sync {
    /// Atomically move `pending -> processing`. Returns `false` when the photo
    /// does not exist or is not pending.
    fn claim_for_processing(&self, photo_id: i64) -> StoreResult<bool>;

    /// Write caption and dominant colors.
    fn save_annotation(&self, photo_id: i64, caption: &str, dominant_colors: &[String]) -> StoreResult<()>;

    /// Move `processing -> completed` and clear the error. Returns `false` when
    /// the photo was not processing.
    fn mark_completed(&self, photo_id: i64) -> StoreResult<bool>;

    /// Move `processing -> failed` with an error text. Returns `false` when the
    /// photo was not processing.
    fn mark_failed(&self, photo_id: i64, error: &str) -> StoreResult<bool>;
}

/// Tag vocabulary and photo/tag associations.
pub trait TagStore: Send + Sync {
    /// Canonical name for an alias, if one is registered.
    fn resolve_alias(&self, name: &str) -> StoreResult<Option<String>>;

    /// Exact-name lookup.
    fn find_tag(&self, name: &str) -> StoreResult<Option<Tag>>;

    /// Create the tag if no tag with this name exists. Returns the stored tag
    /// and whether this call created it.
    fn create_tag(&self, name: &str, category: &str) -> StoreResult<(Tag, bool)>;

    /// Insert a `(photo, tag, source)` association unless one exists. Returns
    /// `true` when a row was inserted; an existing row is left untouched.
    fn link_photo_tag(
        &self,
        photo_id: i64,
        tag_id: i64,
        source: TagSource,
        confidence: f32,
        bbox: Option<BoundingBox>,
    ) -> StoreResult<bool>;
}

/// Everything a run needs from the store.
pub trait AnnotationStore: PhotoStore + TagStore {}

impl<T: PhotoStore + TagStore> AnnotationStore for T {}
