pub const SCHEMA: &str = r#"
-- Photos: only the columns the annotation pipeline reads or writes
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    storage_path TEXT NOT NULL,
    filename TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,

    -- Annotation output
    caption TEXT,
    dominant_colors TEXT,  -- JSON array of color strings

    -- Annotation state machine
    ai_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (ai_status IN ('pending', 'processing', 'completed', 'failed')),
    ai_error TEXT,         -- at most 500 characters
    ai_updated_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_photos_ai_status ON photos(ai_status);

-- Canonical tag vocabulary
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    category TEXT NOT NULL DEFAULT 'other',
    use_count INTEGER NOT NULL DEFAULT 0,  -- advisory only
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_tags_category ON tags(category);

-- Synonyms mapped onto canonical tag names ('kitty' -> 'cat')
CREATE TABLE IF NOT EXISTS tag_aliases (
    alias TEXT PRIMARY KEY,
    canonical TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Photo to tag associations, one row per (photo, tag, source)
CREATE TABLE IF NOT EXISTS photo_tags (
    photo_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    source TEXT NOT NULL CHECK (source IN ('ai', 'manual')),
    confidence REAL NOT NULL,
    bbox TEXT,  -- optional JSON [x, y, w, h]
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (photo_id, tag_id, source),
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE,
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_photo_tags_tag ON photo_tags(tag_id);
CREATE INDEX IF NOT EXISTS idx_photo_tags_source ON photo_tags(source);

-- Queue-backed job runner
CREATE TABLE IF NOT EXISTS annotation_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL UNIQUE,
    image_path TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);
"#;
