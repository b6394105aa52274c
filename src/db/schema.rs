pub const SCHEMA: &str = r#"
-- Albums: registered root directories
CREATE TABLE IF NOT EXISTS albums (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    base_path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',   -- 'active', 'disabled', 'deleted'
    parent_album_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (parent_album_id) REFERENCES albums(id)
);

-- Base path is unique among albums that are not deleted
CREATE UNIQUE INDEX IF NOT EXISTS idx_albums_live_path
    ON albums(base_path) WHERE status != 'deleted';
CREATE INDEX IF NOT EXISTS idx_albums_parent ON albums(parent_album_id);

-- Files: every entry (regular file or directory) inside an album tree
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    album_id TEXT NOT NULL,
    parent_file_id TEXT,
    path TEXT NOT NULL,               -- relative to the album base, '/' separated
    name TEXT NOT NULL,
    extension TEXT NOT NULL DEFAULT '',
    size INTEGER,                     -- NULL for directories
    is_directory INTEGER NOT NULL DEFAULT 0,
    fs_created_at TEXT,
    fs_modified_at TEXT,
    content_date TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    metadata_status TEXT NOT NULL DEFAULT 'new',    -- 'new', 'processed', 'failed'
    metadata_error TEXT,
    thumbnail_status TEXT NOT NULL DEFAULT 'new',
    thumbnail_processed_at TEXT,
    content_hash TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (album_id) REFERENCES albums(id),
    FOREIGN KEY (parent_file_id) REFERENCES files(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_files_live_path
    ON files(album_id, path) WHERE status != 'deleted';
CREATE INDEX IF NOT EXISTS idx_files_parent ON files(album_id, parent_file_id);
CREATE INDEX IF NOT EXISTS idx_files_pending ON files(album_id, status, metadata_status);

-- One typed metadata tag per (file, key); exactly one value group is set
CREATE TABLE IF NOT EXISTS file_meta (
    file_id TEXT NOT NULL,
    meta_key TEXT NOT NULL,
    meta_type TEXT NOT NULL,          -- 'int', 'float', 'string', 'datetime', 'location'
    int_value INTEGER,
    float_value REAL,
    string_value TEXT,
    date_value TEXT,
    latitude REAL,
    longitude REAL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (file_id, meta_key),
    FOREIGN KEY (file_id) REFERENCES files(id)
);

-- Named leases that keep two update runs from overlapping
CREATE TABLE IF NOT EXISTS process_lease (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;
