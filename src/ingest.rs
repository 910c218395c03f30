// Minimal ingest shim.
//
// The core's ingest entry point is `Store::save_items`; real feed polling
// (HTTP fetch, RSS/Atom parsing) is out of scope. This module exists only so
// the binary is runnable end-to-end: it reads a file of already-parsed items
// (JSON array, or JSONL with one item per line) and saves them.

use crate::models::Item;
use crate::store::Store;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse `path` as either a JSON array of items or newline-delimited JSON,
/// and save whatever parses into `store`. Returns the number of rows
/// actually inserted (new urls only; see `Store::save_items`).
pub fn ingest_path(store: &Store, path: &Path) -> Result<usize> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading ingest file {}", path.display()))?;

    let items = parse_items(&contents)
        .with_context(|| format!("parsing ingest file {}", path.display()))?;

    let inserted = store
        .save_items(&items)
        .map_err(|e| anyhow::anyhow!("saving ingested items: {e}"))?;

    tracing::info!(path = %path.display(), parsed = items.len(), inserted, "fetch.complete");
    Ok(inserted)
}

fn parse_items(contents: &str) -> Result<Vec<Item>> {
    let trimmed = contents.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(contents)?);
    }

    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_item_json(id: &str) -> String {
        format!(
            r#"{{"id":"{id}","source_type":"rss","source_name":"Test","title":"Title {id}","summary":"","url":"https://example.com/{id}","author":"","published_at":"{now}","fetched_at":"{now}","read":false,"saved":false}}"#,
            id = id,
            now = Utc::now().to_rfc3339(),
        )
    }

    #[test]
    fn parses_json_array() {
        let contents = format!("[{},{}]", sample_item_json("1"), sample_item_json("2"));
        let items = parse_items(&contents).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn parses_jsonl() {
        let contents = format!("{}\n{}\n", sample_item_json("1"), sample_item_json("2"));
        let items = parse_items(&contents).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn ingest_path_saves_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("items.json");
        let contents = format!("[{}]", sample_item_json("1"));
        fs::write(&file_path, contents).unwrap();

        let store = Store::open_in_memory_shared("ingest-test-db").unwrap();
        let inserted = ingest_path(&store, &file_path).unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.count_all_items().unwrap(), 1);
    }
}
