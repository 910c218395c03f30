//! Schema-version-gated migration runner.
//!
//! The store records a `schema_version` integer in a one-row bookkeeping
//! table. Startup reads it and applies exactly the migrations beyond the
//! stored version; once every migration in the run succeeds, the new
//! version is written. The FTS shadow index is rebuilt from scratch only
//! when it's empty but items already exist (first launch after adopting
//! FTS on an existing database); otherwise the insert/update/delete
//! triggers keep it consistent and no rebuild is needed.

use super::schema::{
    CREATE_FTS_TABLE, CREATE_FTS_TRIGGERS, CREATE_ITEMS_INDICES, CREATE_ITEMS_TABLE,
    SCHEMA_VERSION,
};
use super::StoreError;
use rusqlite::Connection;

pub fn run(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL)",
        [],
    )?;

    let current_version: i64 = conn
        .query_row("SELECT version FROM schema_meta LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch(format!(
            "on-disk schema version {current_version} is newer than this binary supports ({SCHEMA_VERSION})"
        )));
    }

    let tx = conn.transaction()?;

    if current_version < 1 {
        tx.execute(CREATE_ITEMS_TABLE, [])?;
        for stmt in CREATE_ITEMS_INDICES {
            tx.execute(stmt, [])?;
        }
        tx.execute(CREATE_FTS_TABLE, [])?;
        for stmt in CREATE_FTS_TRIGGERS {
            tx.execute(stmt, [])?;
        }
    }

    rebuild_fts_if_needed(&tx)?;

    tx.execute("DELETE FROM schema_meta", [])?;
    tx.execute(
        "INSERT INTO schema_meta (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;
    tx.commit()?;

    Ok(())
}

/// Rebuild the FTS index from the `items` table only when it's empty but
/// items already exist — the signature of a database adopted before FTS
/// was added. The maintenance triggers keep it consistent otherwise, so a
/// full rebuild on every startup would be wasted work on an already-healthy
/// index.
fn rebuild_fts_if_needed(tx: &rusqlite::Transaction<'_>) -> Result<(), StoreError> {
    let item_count: i64 = tx.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
    if item_count == 0 {
        return Ok(());
    }
    let fts_count: i64 = tx.query_row("SELECT COUNT(*) FROM items_fts", [], |row| row.get(0))?;
    if fts_count > 0 {
        return Ok(());
    }

    tx.execute(
        "INSERT INTO items_fts(rowid, title, summary, source_name, author)
         SELECT rowid, title, summary, source_name, author FROM items",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_current_schema_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM schema_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn running_migrations_twice_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM schema_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn rebuilds_fts_for_items_inserted_before_fts_existed() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute(CREATE_ITEMS_TABLE, []).unwrap();
        conn.execute(
            "INSERT INTO items (id, source_type, source_name, title, summary, url, author,
                                 published_at, fetched_at, read, saved)
             VALUES ('1','rss','Feed','Hello World','A summary','https://x/1','Author',
                     '2026-01-01T00:00:00Z','2026-01-01T00:00:00Z',0,0)",
            [],
        )
        .unwrap();

        run(&mut conn).unwrap();

        let fts_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM items_fts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fts_count, 1);
    }
}
