//! Durable item storage: SQLite + FTS5, trigger-maintained lexical mirror,
//! embeddings stored as little-endian float blobs in the same row as the
//! item they describe.
//!
//! Reads go through an `r2d2` pool of read connections; writes go through a
//! single mutex-guarded connection. WAL journaling lets the two coexist
//! without blocking each other for the common case (one writer, many
//! readers), matching the reader/writer split the rest of the system
//! assumes.

mod migrations;
mod schema;

use crate::models::{Embedding, Item};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

pub use schema::SCHEMA_VERSION;

const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Errors surfaced by the store. Never panics; every fallible operation
/// returns one of these instead.
#[derive(Debug)]
pub enum StoreError {
    /// Lock contention / I/O the busy-timeout couldn't absorb.
    Io(String),
    /// A SQL statement failed for a reason other than lock contention.
    Query(String),
    /// An embedding blob was not a multiple of 4 bytes and was rejected
    /// rather than silently truncated.
    Corrupt(String),
    /// The on-disk schema is newer than this binary knows how to read, or a
    /// migration failed partway. Fatal at startup only.
    SchemaMismatch(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(msg) => write!(f, "store I/O error: {msg}"),
            StoreError::Query(msg) => write!(f, "store query error: {msg}"),
            StoreError::Corrupt(msg) => write!(f, "store data corruption: {msg}"),
            StoreError::SchemaMismatch(msg) => write!(f, "store schema error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Encode a float vector as little-endian IEEE-754 bytes.
pub fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode little-endian IEEE-754 bytes back into a float vector.
///
/// Unlike a `chunks_exact(4)` scan, this rejects a blob whose length isn't a
/// multiple of 4 instead of silently dropping the trailing bytes — a
/// truncated embedding is a corruption, not a shorter valid vector.
pub fn decode_embedding(blob: &[u8]) -> StoreResult<Embedding> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    let mut embedding = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        embedding.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(embedding)
}

/// The store's public contract. All operations are thread-safe.
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    writer: Mutex<Connection>,
}

impl Store {
    /// Open (creating if absent) the database at `path`, running any
    /// migrations needed to bring it up to `SCHEMA_VERSION`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS as u64))?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| StoreError::Io(e.to_string()))?;

        let mut writer = Connection::open(path)?;
        writer.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS as u64))?;
        writer.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&mut writer)?;

        Ok(Self {
            pool,
            writer: Mutex::new(writer),
        })
    }

    /// Open an in-memory store shared across the pool and the writer
    /// connection via a named shared-cache URI, for tests.
    #[cfg(test)]
    pub fn open_in_memory_shared(name: &str) -> StoreResult<Self> {
        let uri = format!("file:{name}?mode=memory&cache=shared");
        let manager = SqliteConnectionManager::file(&uri)
            .with_flags(rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let mut writer = Connection::open_with_flags(
            &uri,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        migrations::run(&mut writer)?;
        Ok(Self {
            pool,
            writer: Mutex::new(writer),
        })
    }

    /// Insert items, ignoring url conflicts. Returns the number that were
    /// actually new.
    pub fn save_items(&self, items: &[Item]) -> StoreResult<usize> {
        let mut writer = self.writer.lock().expect("writer mutex poisoned");
        let tx = writer.transaction()?;
        let mut new_count = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO items
                 (id, source_type, source_name, title, summary, url, author,
                  published_at, fetched_at, read, saved)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for item in items {
                let changed = stmt.execute(params![
                    item.id,
                    item.source_type,
                    item.source_name,
                    item.title,
                    item.summary,
                    item.url,
                    item.author,
                    item.published_at.to_rfc3339(),
                    item.fetched_at.to_rfc3339(),
                    item.read,
                    item.saved,
                ])?;
                new_count += changed;
            }
        }
        tx.commit()?;
        Ok(new_count)
    }

    pub fn get_items(&self, limit: usize, include_read: bool) -> StoreResult<Vec<Item>> {
        let conn = self.pool.get()?;
        let sql = if include_read {
            "SELECT id, source_type, source_name, title, summary, url, author,
                    published_at, fetched_at, read, saved
             FROM items ORDER BY published_at DESC LIMIT ?1"
        } else {
            "SELECT id, source_type, source_name, title, summary, url, author,
                    published_at, fetched_at, read, saved
             FROM items WHERE read = 0 ORDER BY published_at DESC LIMIT ?1"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![limit as i64], row_to_item)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn get_items_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Item>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, source_type, source_name, title, summary, url, author,
                    published_at, fetched_at, read, saved
             FROM items WHERE published_at > ?1 ORDER BY published_at DESC",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], row_to_item)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn mark_read(&self, id: &str) -> StoreResult<()> {
        let writer = self.writer.lock().expect("writer mutex poisoned");
        writer.execute("UPDATE items SET read = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn mark_saved(&self, id: &str, saved: bool) -> StoreResult<()> {
        let writer = self.writer.lock().expect("writer mutex poisoned");
        writer.execute(
            "UPDATE items SET saved = ?2 WHERE id = ?1",
            params![id, saved],
        )?;
        Ok(())
    }

    pub fn save_embedding(&self, id: &str, embedding: &Embedding) -> StoreResult<()> {
        let blob = encode_embedding(embedding);
        let writer = self.writer.lock().expect("writer mutex poisoned");
        writer.execute(
            "UPDATE items SET embedding = ?2 WHERE id = ?1",
            params![id, blob],
        )?;
        Ok(())
    }

    pub fn get_embedding(&self, id: &str) -> StoreResult<Option<Embedding>> {
        let conn = self.pool.get()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM items WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(bytes) => Ok(Some(decode_embedding(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Items that have no embedding yet, oldest-fetched first so the
    /// background indexer makes steady progress through the backlog.
    pub fn get_items_needing_embedding(&self, limit: usize) -> StoreResult<Vec<Item>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, source_type, source_name, title, summary, url, author,
                    published_at, fetched_at, read, saved
             FROM items WHERE embedding IS NULL
             ORDER BY fetched_at ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_item)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn get_items_with_embeddings(
        &self,
        ids: &[String],
    ) -> StoreResult<HashMap<String, Embedding>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.pool.get()?;
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, embedding FROM items WHERE id IN ({placeholders}) AND embedding IS NOT NULL"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((id, blob))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (id, blob) = row?;
            out.insert(id, decode_embedding(&blob)?);
        }
        Ok(out)
    }

    /// Full-text search, ranked by weighted BM25 (title=10, summary=5,
    /// source_name=1, author=3). Retries once with the whole query wrapped
    /// as a single quoted literal if the raw query is invalid FTS syntax
    /// (e.g. `C++`, an unclosed quote) — this recovers correct results
    /// instead of surfacing a syntax error to the user.
    pub fn search_fts(&self, query: &str, limit: usize) -> StoreResult<Vec<Item>> {
        match self.search_fts_raw(query, limit) {
            Ok(items) => Ok(items),
            Err(StoreError::Query(_)) => {
                let quoted = format!("\"{}\"", query.replace('"', "\"\""));
                self.search_fts_raw(&quoted, limit)
            }
            Err(other) => Err(other),
        }
    }

    fn search_fts_raw(&self, query: &str, limit: usize) -> StoreResult<Vec<Item>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT i.id, i.source_type, i.source_name, i.title, i.summary, i.url, i.author,
                    i.published_at, i.fetched_at, i.read, i.saved
             FROM items_fts f
             JOIN items i ON i.rowid = f.rowid
             WHERE items_fts MATCH ?1
             ORDER BY bm25(items_fts, 10.0, 5.0, 1.0, 3.0)
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], row_to_item)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub fn clear_all_embeddings(&self) -> StoreResult<()> {
        let writer = self.writer.lock().expect("writer mutex poisoned");
        writer.execute("UPDATE items SET embedding = NULL", [])?;
        Ok(())
    }

    pub fn count_all_items(&self) -> StoreResult<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_items_needing_embedding(&self) -> StoreResult<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE embedding IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Fence all in-flight operations by acquiring the write lock; called
    /// during graceful shutdown.
    pub fn close(&self) {
        let _writer = self.writer.lock().expect("writer mutex poisoned");
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    let published_at: String = row.get(7)?;
    let fetched_at: String = row.get(8)?;
    Ok(Item {
        id: row.get(0)?,
        source_type: row.get(1)?,
        source_name: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        url: row.get(5)?,
        author: row.get(6)?,
        published_at: parse_rfc3339(&published_at),
        fetched_at: parse_rfc3339(&fetched_at),
        read: row.get(9)?,
        saved: row.get(10)?,
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item(id: &str, title: &str, published_minutes_ago: i64) -> Item {
        Item {
            id: id.to_string(),
            source_type: "rss".to_string(),
            source_name: "Test Feed".to_string(),
            title: title.to_string(),
            summary: format!("Summary for {title}"),
            url: format!("https://example.com/{id}"),
            author: "Jane Reporter".to_string(),
            published_at: Utc::now() - chrono::Duration::minutes(published_minutes_ago),
            fetched_at: Utc::now(),
            read: false,
            saved: false,
        }
    }

    #[test]
    fn embedding_roundtrip() {
        let vec = vec![1.0f32, -2.5, 0.0, 3.25];
        let blob = encode_embedding(&vec);
        assert_eq!(blob.len(), 16);
        let decoded = decode_embedding(&blob).unwrap();
        assert_eq!(decoded, vec);
    }

    #[test]
    fn decode_rejects_truncated_blob() {
        let blob = vec![0u8, 1, 2]; // 3 bytes, not a multiple of 4
        assert!(decode_embedding(&blob).is_err());
    }

    #[test]
    fn save_and_get_items_orders_by_published_desc() {
        let store = Store::open_in_memory_shared("save_and_get").unwrap();
        let items = vec![
            sample_item("1", "NFL Draft 2025", 30),
            sample_item("2", "GPT-5 Released", 5),
            sample_item("3", "Bitcoin Surges", 60),
        ];
        let new_count = store.save_items(&items).unwrap();
        assert_eq!(new_count, 3);

        let fetched = store.get_items(10, true).unwrap();
        assert_eq!(
            fetched.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["2", "1", "3"]
        );
    }

    #[test]
    fn save_items_ignores_url_conflicts() {
        let store = Store::open_in_memory_shared("url_conflict").unwrap();
        let item = sample_item("1", "Original", 0);
        store.save_items(&[item.clone()]).unwrap();

        let mut dup = sample_item("2", "Duplicate Url", 0);
        dup.url = item.url.clone();
        let new_count = store.save_items(&[dup]).unwrap();
        assert_eq!(new_count, 0);
        assert_eq!(store.count_all_items().unwrap(), 1);
    }

    #[test]
    fn search_fts_finds_matching_title() {
        let store = Store::open_in_memory_shared("fts_basic").unwrap();
        let items = vec![
            sample_item("1", "NFL Draft 2025", 10),
            sample_item("2", "GPT-5 Released", 10),
            sample_item("3", "Bitcoin Surges", 10),
            sample_item("4", "Weather Today", 10),
        ];
        store.save_items(&items).unwrap();

        let results = store.search_fts("nfl", 50).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "NFL Draft 2025");
    }

    #[test]
    fn search_fts_recovers_from_invalid_syntax() {
        let store = Store::open_in_memory_shared("fts_invalid_syntax").unwrap();
        store
            .save_items(&[sample_item("1", "C++ Tutorial For Beginners", 10)])
            .unwrap();

        // `C++` is not valid FTS5 query syntax on its own; the quoted-literal
        // retry should still find the item.
        let results = store.search_fts("C++", 50).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn mark_read_and_saved_persist() {
        let store = Store::open_in_memory_shared("mark_flags").unwrap();
        store.save_items(&[sample_item("1", "Some Item", 0)]).unwrap();

        store.mark_read("1").unwrap();
        store.mark_saved("1", true).unwrap();

        let items = store.get_items(10, true).unwrap();
        assert!(items[0].read);
        assert!(items[0].saved);
    }

    #[test]
    fn items_needing_embedding_excludes_embedded() {
        let store = Store::open_in_memory_shared("needs_embedding").unwrap();
        store
            .save_items(&[sample_item("1", "A", 0), sample_item("2", "B", 0)])
            .unwrap();
        store.save_embedding("1", &vec![0.1, 0.2]).unwrap();

        let pending = store.get_items_needing_embedding(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "2");
        assert_eq!(store.count_items_needing_embedding().unwrap(), 1);
    }

    #[test]
    fn get_items_with_embeddings_only_returns_embedded() {
        let store = Store::open_in_memory_shared("with_embeddings").unwrap();
        store
            .save_items(&[sample_item("1", "A", 0), sample_item("2", "B", 0)])
            .unwrap();
        store.save_embedding("1", &vec![1.0, 0.0]).unwrap();

        let map = store
            .get_items_with_embeddings(&["1".to_string(), "2".to_string()])
            .unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("1"));
    }

    #[test]
    fn clear_all_embeddings_empties_every_row() {
        let store = Store::open_in_memory_shared("clear_embeddings").unwrap();
        store.save_items(&[sample_item("1", "A", 0)]).unwrap();
        store.save_embedding("1", &vec![1.0]).unwrap();
        store.clear_all_embeddings().unwrap();
        assert_eq!(store.get_embedding("1").unwrap(), None);
    }

    #[test]
    fn empty_corpus_search_returns_empty_not_error() {
        let store = Store::open_in_memory_shared("empty_corpus").unwrap();
        let results = store.search_fts("anything", 50).unwrap();
        assert!(results.is_empty());
    }
}
