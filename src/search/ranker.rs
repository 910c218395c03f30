//! Pure ranking and filtering functions. No state, no I/O: every function
//! takes a slice and returns a new `Vec`, never mutating its input. All
//! sorts are stable — ties keep their prior relative order rather than
//! being broken by id, which would visibly reshuffle results between
//! otherwise-identical runs.

use crate::models::Item;
use crate::reranker::Reranker;
use crate::search::embedding_index::{cosine_similarity, EmbeddingIndex};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

/// Classification a pure filter assigns to a single item. A sum type in
/// place of boolean flags or string tags, per the "no inheritance, no
/// tag-based polymorphism" design note — most filters in this module only
/// ever produce `Keep`/`Hide`, but the type carries the richer vocabulary
/// the UI's filter-status bar needs for things like "Boost" (query-adjacent
/// more-like-this) or "Tag" (saved-for-later) even though the filters
/// implemented here don't emit them yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Keep,
    Hide,
    Dim,
    Boost,
    Tag,
    Flag,
}

/// Reorder `items` by cosine similarity to `query_vec`. Items with an
/// embedding come first (sorted by similarity, descending); items without
/// one keep their relative input order at the tail.
pub fn cosine_rerank(items: &[Item], embeddings: &EmbeddingIndex, query_vec: &[f32]) -> Vec<Item> {
    let mut with_embedding: Vec<(f32, Item)> = Vec::new();
    let mut without_embedding: Vec<Item> = Vec::new();

    for item in items {
        match embeddings.get(&item.id) {
            Some(vec) => {
                let score = cosine_similarity(vec, query_vec);
                with_embedding.push((score, item.clone()));
            }
            None => without_embedding.push(item.clone()),
        }
    }

    with_embedding.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut result: Vec<Item> = with_embedding.into_iter().map(|(_, item)| item).collect();
    result.extend(without_embedding);
    result
}

/// Build the document string a cross-encoder scores against: the title,
/// plus `" - " + summary` when the summary is shorter than 200 characters
/// (long summaries add noise without adding relevance signal).
pub fn rerank_document_text(item: &Item) -> String {
    if item.summary.chars().count() < 200 {
        format!("{} - {}", item.title, item.summary)
    } else {
        item.title.clone()
    }
}

/// Cross-encoder rerank using a batch `Reranker`. On any failure — the
/// reranker errors, or returns a score count that doesn't match the input —
/// the input is returned unchanged (graceful degradation; the caller keeps
/// showing the prior-stage ranking).
pub fn cross_encoder_rerank(items: &[Item], query: &str, reranker: &dyn Reranker) -> Vec<Item> {
    if items.is_empty() {
        return Vec::new();
    }
    let docs: Vec<String> = items.iter().map(rerank_document_text).collect();
    match reranker.rerank(query, &docs) {
        Ok(scores) if scores.len() == items.len() => {
            apply_scores_as_order(items, &scores)
        }
        _ => items.to_vec(),
    }
}

/// Sort `candidates` by their parallel `scores`, descending, stably. Used
/// both for a completed batch rerank and for the accumulated per-entry
/// scores of a parallel-scoring backend.
pub fn apply_scores_as_order(candidates: &[Item], scores: &[f32]) -> Vec<Item> {
    let mut paired: Vec<(f32, Item)> = candidates
        .iter()
        .zip(scores.iter())
        .map(|(item, score)| (*score, item.clone()))
        .collect();
    paired.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    paired.into_iter().map(|(_, item)| item).collect()
}

/// Reassemble a full visible list once a (possibly K < len(visible)) subset
/// has been scored: scored items first, in their scored order, then the
/// remaining items in their prior relative order.
pub fn reassemble_after_rerank(visible: &[Item], scored_in_order: &[Item]) -> Vec<Item> {
    let scored_ids: HashSet<&str> = scored_in_order.iter().map(|i| i.id.as_str()).collect();
    let mut result: Vec<Item> = scored_in_order.to_vec();
    result.extend(
        visible
            .iter()
            .filter(|item| !scored_ids.contains(item.id.as_str()))
            .cloned(),
    );
    result
}

/// Keep only items published more recently than `now - max_age`.
pub fn age_filter(items: &[Item], max_age: Duration, now: DateTime<Utc>) -> Vec<Item> {
    let cutoff = now - max_age;
    items
        .iter()
        .filter(|item| item.published_at > cutoff)
        .cloned()
        .collect()
}

/// Keep at most `cap` items per `source_name`, preferring the most recently
/// published, while preserving the original relative order of survivors.
pub fn per_source_cap(items: &[Item], cap: usize) -> Vec<Item> {
    if cap == 0 {
        return Vec::new();
    }

    let mut by_source: HashMap<&str, Vec<&Item>> = HashMap::new();
    for item in items {
        by_source.entry(item.source_name.as_str()).or_default().push(item);
    }

    let mut keep_ids: HashSet<&str> = HashSet::new();
    for group in by_source.values_mut() {
        group.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        for item in group.iter().take(cap) {
            keep_ids.insert(item.id.as_str());
        }
    }

    items
        .iter()
        .filter(|item| keep_ids.contains(item.id.as_str()))
        .cloned()
        .collect()
}

/// Common news headline prefixes stripped (at most one) during title
/// normalization for dedup purposes.
const TITLE_PREFIXES: &[&str] = &[
    "breaking:",
    "update:",
    "exclusive:",
    "just in:",
    "developing:",
    "watch:",
    "live:",
    "opinion:",
    "analysis:",
    "review:",
];

/// Lowercase a title and strip at most one leading prefix from the closed
/// list above, for dedup comparison only — the stored `Item.title` is never
/// mutated.
pub fn normalize_title(title: &str) -> String {
    let lower = title.trim().to_lowercase();
    for prefix in TITLE_PREFIXES {
        if let Some(rest) = lower.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    lower
}

/// Remove duplicates by non-empty url and by normalized-title, keeping only
/// the first occurrence of each in input order.
pub fn dedup_items(items: &[Item]) -> Vec<Item> {
    let mut seen_urls: HashSet<&str> = HashSet::new();
    let mut seen_titles: HashSet<String> = HashSet::new();
    let mut result = Vec::with_capacity(items.len());

    for item in items {
        if !item.url.is_empty() && !seen_urls.insert(item.url.as_str()) {
            continue;
        }
        let normalized = normalize_title(&item.title);
        if !normalized.is_empty() && !seen_titles.insert(normalized) {
            continue;
        }
        result.push(item.clone());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn item(id: &str, title: &str, source: &str, minutes_ago: i64) -> Item {
        Item {
            id: id.to_string(),
            source_type: "rss".to_string(),
            source_name: source.to_string(),
            title: title.to_string(),
            summary: "A short summary.".to_string(),
            url: format!("https://example.com/{id}"),
            author: "Author".to_string(),
            published_at: Utc::now() - Duration::minutes(minutes_ago),
            fetched_at: Utc::now(),
            read: false,
            saved: false,
        }
    }

    #[test]
    fn cosine_rerank_puts_embedded_items_first_sorted_by_similarity() {
        let items = vec![
            item("1", "No Embedding", "A", 0),
            item("2", "Low Similarity", "A", 0),
            item("3", "High Similarity", "A", 0),
        ];
        let mut map = StdHashMap::new();
        map.insert("2".to_string(), vec![0.1, 0.0]);
        map.insert("3".to_string(), vec![1.0, 0.0]);
        let index = EmbeddingIndex::new(map);

        let ranked = cosine_rerank(&items, &index, &[1.0, 0.0]);
        assert_eq!(
            ranked.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["3", "2", "1"]
        );
    }

    #[test]
    fn cosine_rerank_preserves_order_among_unembedded_items() {
        let items = vec![item("1", "A", "S", 0), item("2", "B", "S", 0)];
        let index = EmbeddingIndex::empty();
        let ranked = cosine_rerank(&items, &index, &[1.0]);
        assert_eq!(
            ranked.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );
    }

    struct FixedReranker {
        scores: Vec<f32>,
    }
    impl Reranker for FixedReranker {
        fn available(&self) -> bool {
            true
        }
        fn rerank(
            &self,
            _query: &str,
            _docs: &[String],
        ) -> Result<Vec<f32>, crate::reranker::RerankerError> {
            Ok(self.scores.clone())
        }
    }

    struct FailingReranker;
    impl Reranker for FailingReranker {
        fn available(&self) -> bool {
            true
        }
        fn rerank(
            &self,
            _query: &str,
            _docs: &[String],
        ) -> Result<Vec<f32>, crate::reranker::RerankerError> {
            Err(crate::reranker::RerankerError::Timeout)
        }
    }

    #[test]
    fn cross_encoder_rerank_sorts_descending_by_score() {
        let items = vec![item("1", "Low", "S", 0), item("2", "High", "S", 0)];
        let reranker = FixedReranker {
            scores: vec![0.1, 0.9],
        };
        let ranked = cross_encoder_rerank(&items, "q", &reranker);
        assert_eq!(
            ranked.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["2", "1"]
        );
    }

    #[test]
    fn cross_encoder_rerank_degrades_gracefully_on_error() {
        let items = vec![item("1", "A", "S", 0), item("2", "B", "S", 0)];
        let ranked = cross_encoder_rerank(&items, "q", &FailingReranker);
        assert_eq!(
            ranked.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );
    }

    #[test]
    fn cross_encoder_rerank_degrades_on_wrong_score_count() {
        let items = vec![item("1", "A", "S", 0), item("2", "B", "S", 0)];
        let reranker = FixedReranker { scores: vec![0.5] };
        let ranked = cross_encoder_rerank(&items, "q", &reranker);
        assert_eq!(
            ranked.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );
    }

    #[test]
    fn reassemble_puts_scored_first_then_remaining_in_prior_order() {
        let visible = vec![
            item("1", "A", "S", 0),
            item("2", "B", "S", 0),
            item("3", "C", "S", 0),
        ];
        let scored = vec![visible[2].clone(), visible[0].clone()];
        let result = reassemble_after_rerank(&visible, &scored);
        assert_eq!(
            result.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["3", "1", "2"]
        );
    }

    #[test]
    fn age_filter_keeps_only_recent_items() {
        let items = vec![item("1", "Recent", "S", 5), item("2", "Old", "S", 120)];
        let result = age_filter(&items, Duration::minutes(60), Utc::now());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "1");
    }

    #[test]
    fn per_source_cap_limits_items_per_source_to_most_recent() {
        let items = vec![
            item("1", "A1", "SourceA", 5),
            item("2", "A2", "SourceA", 50),
            item("3", "A3", "SourceA", 10),
            item("4", "B1", "SourceB", 1),
        ];
        let result = per_source_cap(&items, 2);
        let ids: Vec<&str> = result.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&"1"));
        assert!(ids.contains(&"3"));
        assert!(!ids.contains(&"2"));
        assert!(ids.contains(&"4"));
    }

    #[test]
    fn dedup_removes_url_duplicates_keeping_first() {
        let mut b = item("2", "Different Title", "S", 0);
        b.url = "https://example.com/1".to_string(); // same url as item 1
        let items = vec![item("1", "Original", "S", 0), b];
        let result = dedup_items(&items);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "1");
    }

    #[test]
    fn dedup_removes_similar_titles_across_prefixes() {
        let items = vec![
            item("1", "Major Event", "S", 0),
            item("2", "Breaking: Major Event", "S", 0),
            item("3", "UPDATE: major event", "S", 0),
            item("4", "Different Story", "S", 0),
        ];
        let result = dedup_items(&items);
        assert_eq!(
            result.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["1", "4"]
        );
    }

    #[test]
    fn empty_items_produce_empty_results_not_errors() {
        assert!(dedup_items(&[]).is_empty());
        assert!(age_filter(&[], Duration::hours(1), Utc::now()).is_empty());
        assert!(per_source_cap(&[], 3).is_empty());
    }
}
