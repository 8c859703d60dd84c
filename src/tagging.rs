//! Reconciling machine-produced tags with the shared tag vocabulary.

use crate::analysis::ScoredTag;
use crate::db::{StoreResult, TagSource, TagStore};

pub const DEFAULT_CATEGORY: &str = "other";

/// What a reconcile call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Vocabulary entries this call created.
    pub created_tags: usize,
    /// New photo/tag associations.
    pub linked: usize,
    /// Associations that already existed and were left untouched.
    pub already_linked: usize,
}

/// Attach `tags` to a photo as `ai` associations.
///
/// Names are trimmed, empty names skipped and aliases resolved before lookup.
/// Missing tags are created with `default_category` (or "other"). Repeated
/// names collapse to their first occurrence, and an association that already
/// exists keeps its original confidence. Safe to call repeatedly and from
/// concurrent runs.
pub fn reconcile<S: TagStore + ?Sized>(
    store: &S,
    photo_id: i64,
    tags: &[ScoredTag],
    default_category: Option<&str>,
) -> StoreResult<ReconcileSummary> {
    let category = default_category
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY);

    let mut summary = ReconcileSummary::default();
    let mut seen: Vec<String> = Vec::with_capacity(tags.len());

    for scored in tags {
        let name = scored.name.trim();
        if name.is_empty() {
            continue;
        }

        let name = match store.resolve_alias(name)? {
            Some(canonical) if !canonical.trim().is_empty() => canonical.trim().to_string(),
            _ => name.to_string(),
        };
        if seen.contains(&name) {
            continue;
        }

        let tag = match store.find_tag(&name)? {
            Some(tag) => tag,
            None => {
                let (tag, created) = store.create_tag(&name, category)?;
                if created {
                    summary.created_tags += 1;
                }
                tag
            }
        };

        let confidence = if scored.confidence.is_nan() {
            0.0
        } else {
            scored.confidence.clamp(0.0, 1.0)
        };

        if store.link_photo_tag(photo_id, tag.id, TagSource::Ai, confidence, None)? {
            summary.linked += 1;
        } else {
            summary.already_linked += 1;
        }
        seen.push(name);
    }

    tracing::debug!(
        photo_id,
        created_tags = summary.created_tags,
        linked = summary.linked,
        already_linked = summary.already_linked,
        "Reconciled tags"
    );
    Ok(summary)
}
