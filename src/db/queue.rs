//! Annotation job table used by the queue-backed runner.

use rusqlite::params;
use std::path::{Path, PathBuf};

use super::{Database, StoreResult};

/// A job waiting in `annotation_jobs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub photo_id: i64,
    pub image_path: PathBuf,
}

impl Database {
    /// Queue a photo for annotation. Returns `false` if it was already queued.
    pub fn enqueue_job(&self, photo_id: i64, image_path: &Path) -> StoreResult<bool> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO annotation_jobs (photo_id, image_path) VALUES (?, ?)",
            params![photo_id, image_path.to_string_lossy()],
        )?;
        Ok(inserted == 1)
    }

    /// Remove and return up to `limit` jobs, oldest first. The select and the
    /// delete share one immediate transaction so two drainers never hand out
    /// the same job.
    pub fn dequeue_jobs(&self, limit: usize) -> StoreResult<Vec<QueuedJob>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let jobs = {
            let mut stmt = tx.prepare(
                "SELECT id, photo_id, image_path FROM annotation_jobs ORDER BY id ASC LIMIT ?",
            )?;
            let rows = stmt
                .query_map([limit as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (id, _, _) in &jobs {
            tx.execute("DELETE FROM annotation_jobs WHERE id = ?", [id])?;
        }
        tx.commit()?;

        Ok(jobs
            .into_iter()
            .map(|(_, photo_id, image_path)| QueuedJob {
                photo_id,
                image_path: PathBuf::from(image_path),
            })
            .collect())
    }

    pub fn queued_job_count(&self) -> StoreResult<i64> {
        let conn = self.connect()?;
        let count = conn.query_row("SELECT COUNT(*) FROM annotation_jobs", [], |row| row.get(0))?;
        Ok(count)
    }
}
