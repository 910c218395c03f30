//! Static schema definitions: the current `SCHEMA_VERSION`, the `items`
//! table, its indices, and the FTS5 shadow index + maintenance triggers.

/// Bumped whenever the schema changes; `migrations::run` brings an
/// older on-disk database up to this version.
pub const SCHEMA_VERSION: i64 = 1;

pub const CREATE_ITEMS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS items (
        id           TEXT PRIMARY KEY,
        source_type  TEXT NOT NULL,
        source_name  TEXT NOT NULL,
        title        TEXT NOT NULL,
        summary      TEXT NOT NULL,
        url          TEXT NOT NULL,
        author       TEXT NOT NULL,
        published_at TEXT NOT NULL,
        fetched_at   TEXT NOT NULL,
        read         INTEGER NOT NULL DEFAULT 0,
        saved        INTEGER NOT NULL DEFAULT 0,
        embedding    BLOB
    )";

pub const CREATE_ITEMS_INDICES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_items_published_at ON items(published_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_items_source_name ON items(source_name)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_items_url ON items(url) WHERE url != ''",
    "CREATE INDEX IF NOT EXISTS idx_items_needs_embedding ON items(id) WHERE embedding IS NULL",
];

pub const CREATE_FTS_TABLE: &str = "
    CREATE VIRTUAL TABLE IF NOT EXISTS items_fts USING fts5(
        title, summary, source_name, author,
        content='items', content_rowid='rowid',
        tokenize = 'unicode61 remove_diacritics 2'
    )";

pub const CREATE_FTS_TRIGGERS: &[&str] = &[
    "CREATE TRIGGER IF NOT EXISTS items_fts_after_insert AFTER INSERT ON items BEGIN
        INSERT INTO items_fts(rowid, title, summary, source_name, author)
        VALUES (new.rowid, new.title, new.summary, new.source_name, new.author);
     END",
    "CREATE TRIGGER IF NOT EXISTS items_fts_after_update
        AFTER UPDATE OF title, summary, source_name, author ON items
     BEGIN
        INSERT INTO items_fts(items_fts, rowid, title, summary, source_name, author)
        VALUES ('delete', old.rowid, old.title, old.summary, old.source_name, old.author);
        INSERT INTO items_fts(rowid, title, summary, source_name, author)
        VALUES (new.rowid, new.title, new.summary, new.source_name, new.author);
     END",
    "CREATE TRIGGER IF NOT EXISTS items_fts_after_delete AFTER DELETE ON items BEGIN
        INSERT INTO items_fts(items_fts, rowid, title, summary, source_name, author)
        VALUES ('delete', old.rowid, old.title, old.summary, old.source_name, old.author);
     END",
];
