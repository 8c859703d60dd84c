//! SQLite backend implementation.

use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::schema::SCHEMA;
use super::store::{PhotoStore, TagStore};
use super::{BoundingBox, PhotoRecord, PhotoTag, StoreResult, Tag, TagSource};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the SQLite database file.
///
/// Holds no connection itself: each operation opens one, uses it and drops it,
/// so concurrent runs on different worker threads never share a connection.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Self {
            path: path.to_path_buf(),
        };
        // Fail early on an unusable path.
        db.connect()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    // ========================================================================
    // Photo operations
    // ========================================================================

    /// Register a stored image as a new `pending` photo.
    pub fn insert_photo(&self, storage_path: &Path) -> StoreResult<i64> {
        let conn = self.connect()?;
        let filename = storage_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        conn.execute(
            "INSERT INTO photos (storage_path, filename, ai_status) VALUES (?, ?, 'pending')",
            rusqlite::params![storage_path.to_string_lossy(), filename],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_photo(&self, photo_id: i64) -> StoreResult<Option<PhotoRecord>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                r#"
                SELECT id, storage_path, filename, caption, dominant_colors,
                       ai_status, ai_error, ai_updated_at
                FROM photos
                WHERE id = ?
                "#,
                [photo_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, storage_path, filename, caption, colors_json, status, ai_error, ai_updated_at)) = row
        else {
            return Ok(None);
        };

        let dominant_colors = match colors_json {
            Some(json) if !json.is_empty() => serde_json::from_str(&json)?,
            _ => Vec::new(),
        };

        Ok(Some(PhotoRecord {
            id,
            storage_path,
            filename,
            caption,
            dominant_colors,
            ai_status: status.parse()?,
            ai_error,
            ai_updated_at,
        }))
    }

    // ========================================================================
    // Tag operations
    // ========================================================================

    pub fn get_photo_tags(&self, photo_id: i64) -> StoreResult<Vec<PhotoTag>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.name, t.category, t.use_count, pt.source, pt.confidence, pt.bbox
            FROM photo_tags pt
            JOIN tags t ON t.id = pt.tag_id
            WHERE pt.photo_id = ?
            ORDER BY t.name, pt.source
            "#,
        )?;
        let rows = stmt
            .query_map([photo_id], |row| {
                Ok((
                    Tag {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        category: row.get(2)?,
                        use_count: row.get(3)?,
                    },
                    row.get::<_, String>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tags = Vec::with_capacity(rows.len());
        for (tag, source, confidence, bbox) in rows {
            let bbox = match bbox {
                Some(json) => Some(serde_json::from_str::<BoundingBox>(&json)?),
                None => None,
            };
            tags.push(PhotoTag {
                tag,
                source: source.parse()?,
                confidence: confidence as f32,
                bbox,
            });
        }
        Ok(tags)
    }

    pub fn add_alias(&self, alias: &str, canonical: &str) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO tag_aliases (alias, canonical) VALUES (?, ?)
            ON CONFLICT(alias) DO UPDATE SET canonical = excluded.canonical
            "#,
            rusqlite::params![alias.trim(), canonical.trim()],
        )?;
        Ok(())
    }
}

fn find_tag_with(conn: &Connection, name: &str) -> StoreResult<Option<Tag>> {
    let tag = conn
        .query_row(
            "SELECT id, name, category, use_count FROM tags WHERE name = ?",
            [name],
            |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    category: row.get(2)?,
                    use_count: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(tag)
}

impl PhotoStore for Database {
    fn claim_for_processing(&self, photo_id: i64) -> StoreResult<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE photos
            SET ai_status = 'processing', ai_updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND ai_status = 'pending'
            "#,
            [photo_id],
        )?;
        Ok(changed == 1)
    }

    fn save_annotation(&self, photo_id: i64, caption: &str, dominant_colors: &[String]) -> StoreResult<()> {
        let colors_json = serde_json::to_string(dominant_colors)?;
        let conn = self.connect()?;
        conn.execute(
            "UPDATE photos SET caption = ?, dominant_colors = ? WHERE id = ?",
            rusqlite::params![caption, colors_json, photo_id],
        )?;
        Ok(())
    }

    fn mark_completed(&self, photo_id: i64) -> StoreResult<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE photos
            SET ai_status = 'completed', ai_error = NULL, ai_updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND ai_status = 'processing'
            "#,
            [photo_id],
        )?;
        Ok(changed == 1)
    }

    fn mark_failed(&self, photo_id: i64, error: &str) -> StoreResult<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE photos
            SET ai_status = 'failed', ai_error = ?, ai_updated_at = CURRENT_TIMESTAMP
            WHERE id = ? AND ai_status = 'processing'
            "#,
            rusqlite::params![crate::error::truncate_message(error), photo_id],
        )?;
        Ok(changed == 1)
    }
}

impl TagStore for Database {
    fn resolve_alias(&self, name: &str) -> StoreResult<Option<String>> {
        let conn = self.connect()?;
        let canonical = conn
            .query_row(
                "SELECT canonical FROM tag_aliases WHERE alias = ?",
                [name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(canonical)
    }

    fn find_tag(&self, name: &str) -> StoreResult<Option<Tag>> {
        let conn = self.connect()?;
        find_tag_with(&conn, name)
    }

    fn create_tag(&self, name: &str, category: &str) -> StoreResult<(Tag, bool)> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tags (name, category) VALUES (?, ?)",
            rusqlite::params![name, category],
        )?;
        let tag = find_tag_with(&conn, name)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        Ok((tag, inserted == 1))
    }

    fn link_photo_tag(
        &self,
        photo_id: i64,
        tag_id: i64,
        source: TagSource,
        confidence: f32,
        bbox: Option<BoundingBox>,
    ) -> StoreResult<bool> {
        let bbox_json = bbox.map(|b| serde_json::to_string(&b)).transpose()?;
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            r#"
            INSERT OR IGNORE INTO photo_tags (photo_id, tag_id, source, confidence, bbox)
            VALUES (?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                photo_id,
                tag_id,
                source.as_str(),
                f64::from(confidence.clamp(0.0, 1.0)),
                bbox_json
            ],
        )?;
        if inserted == 1 {
            tx.execute("UPDATE tags SET use_count = use_count + 1 WHERE id = ?", [tag_id])?;
        }
        tx.commit()?;
        Ok(inserted == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AiStatus;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("momento.db")).unwrap();
        db.initialize().unwrap();
        (dir, db)
    }

    #[test]
    fn test_new_photo_is_pending() {
        let (_dir, db) = test_db();
        let id = db.insert_photo(Path::new("/uploads/2024/cat.jpg")).unwrap();

        let photo = db.get_photo(id).unwrap().unwrap();
        assert_eq!(photo.ai_status, AiStatus::Pending);
        assert_eq!(photo.filename, "cat.jpg");
        assert!(photo.caption.is_none());
        assert!(photo.dominant_colors.is_empty());
        assert!(db.get_photo(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_claim_only_succeeds_once() {
        let (_dir, db) = test_db();
        let id = db.insert_photo(Path::new("a.jpg")).unwrap();

        assert!(db.claim_for_processing(id).unwrap());
        assert!(!db.claim_for_processing(id).unwrap());
        assert!(!db.claim_for_processing(id + 1).unwrap());
        assert_eq!(db.get_photo(id).unwrap().unwrap().ai_status, AiStatus::Processing);
    }

    #[test]
    fn test_terminal_transitions_require_processing() {
        let (_dir, db) = test_db();
        let id = db.insert_photo(Path::new("a.jpg")).unwrap();

        // Not claimed yet
        assert!(!db.mark_completed(id).unwrap());
        assert!(!db.mark_failed(id, "nope").unwrap());

        assert!(db.claim_for_processing(id).unwrap());
        assert!(db.mark_failed(id, "boom").unwrap());
        let photo = db.get_photo(id).unwrap().unwrap();
        assert_eq!(photo.ai_status, AiStatus::Failed);
        assert_eq!(photo.ai_error.as_deref(), Some("boom"));

        // Terminal stays terminal
        assert!(!db.mark_completed(id).unwrap());
        assert!(!db.claim_for_processing(id).unwrap());
    }

    #[test]
    fn test_completed_clears_error_and_stores_annotation() {
        let (_dir, db) = test_db();
        let id = db.insert_photo(Path::new("a.jpg")).unwrap();
        assert!(db.claim_for_processing(id).unwrap());

        let colors = vec!["#ff0000".to_string(), "#00ff00".to_string()];
        db.save_annotation(id, "A red thing", &colors).unwrap();
        assert!(db.mark_completed(id).unwrap());

        let photo = db.get_photo(id).unwrap().unwrap();
        assert_eq!(photo.ai_status, AiStatus::Completed);
        assert_eq!(photo.caption.as_deref(), Some("A red thing"));
        assert_eq!(photo.dominant_colors, colors);
        assert!(photo.ai_error.is_none());
        assert!(photo.ai_updated_at.is_some());
    }

    #[test]
    fn test_failed_error_is_truncated() {
        let (_dir, db) = test_db();
        let id = db.insert_photo(Path::new("a.jpg")).unwrap();
        assert!(db.claim_for_processing(id).unwrap());
        assert!(db.mark_failed(id, &"e".repeat(2000)).unwrap());

        let photo = db.get_photo(id).unwrap().unwrap();
        assert_eq!(photo.ai_error.unwrap().chars().count(), 500);
    }

    #[test]
    fn test_create_tag_is_idempotent() {
        let (_dir, db) = test_db();
        let (first, created) = db.create_tag("cat", "animal").unwrap();
        assert!(created);
        let (second, created_again) = db.create_tag("cat", "object").unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert_eq!(second.category, "animal");
        assert_eq!(db.find_tag("cat").unwrap(), Some(first));
        assert!(db.find_tag("Cat").unwrap().is_none());
    }

    #[test]
    fn test_link_photo_tag_first_write_wins() {
        let (_dir, db) = test_db();
        let photo = db.insert_photo(Path::new("a.jpg")).unwrap();
        let (tag, _) = db.create_tag("cat", "other").unwrap();

        assert!(db.link_photo_tag(photo, tag.id, TagSource::Ai, 0.8, None).unwrap());
        assert!(!db.link_photo_tag(photo, tag.id, TagSource::Ai, 0.3, None).unwrap());
        // Same tag from a different source is a separate row
        let bbox = BoundingBox([1.0, 2.0, 30.0, 40.0]);
        assert!(db.link_photo_tag(photo, tag.id, TagSource::Manual, 1.0, Some(bbox)).unwrap());

        let tags = db.get_photo_tags(photo).unwrap();
        assert_eq!(tags.len(), 2);
        let ai = tags.iter().find(|t| t.source == TagSource::Ai).unwrap();
        assert!((ai.confidence - 0.8).abs() < 1e-6);
        let manual = tags.iter().find(|t| t.source == TagSource::Manual).unwrap();
        assert_eq!(manual.bbox, Some(bbox));
        assert_eq!(db.find_tag("cat").unwrap().unwrap().use_count, 2);
    }

    #[test]
    fn test_aliases() {
        let (_dir, db) = test_db();
        assert!(db.resolve_alias("kitty").unwrap().is_none());
        db.add_alias("kitty", "cat").unwrap();
        assert_eq!(db.resolve_alias("kitty").unwrap().as_deref(), Some("cat"));
        db.add_alias("kitty", "kitten").unwrap();
        assert_eq!(db.resolve_alias("kitty").unwrap().as_deref(), Some("kitten"));
    }
}
