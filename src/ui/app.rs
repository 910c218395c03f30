// UI application state
//
// This module manages the state of the feed reader's TUI application: the
// currently visible item list, the active mode, the search pipeline, and
// cursor/scroll state. All mutation happens inside message handling on the
// single-threaded event loop; no mutex is needed here.

use crate::config::Config;
use crate::embedder::Embedder;
use crate::logging::{LogEvent, Logger};
use crate::models::{Item, QueryId};
use crate::reranker::Reranker;
use crate::search::{ranker, CancellationHandle, Command, EmbeddingIndex, PipelineEvent, PipelineMessage, SearchPipeline};
use crate::store::Store;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;

/// How far back "recent" reaches for the instant-paint load at startup.
const RECENT_ITEMS_WINDOW_MINUTES: i64 = 60;

/// Active mode in the TUI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    List,
    Search,
    Results,
    History,
    Article,
}

/// Main application state for the feed reader's TUI.
///
/// # Architecture
///
/// The App struct is the central state container. It's organized into
/// logical groups:
///
/// - **Core Data**: store handle, search pipeline, the currently visible items
/// - **Navigation**: mode, push-down previous-mode stack, cursor
/// - **Search**: input text, last submitted query, status hint
/// - **Feedback**: error bar, status bar
/// - **Lifecycle**: quit flag
///
/// # Usage
///
/// ```ignore
/// let mut app = App::new(store, embedder, reranker, config);
/// let commands = app.enter_search();
/// app.push_search_char('n');
/// let commands = app.submit_search();    // Navigation: List -> Results
/// ```
pub struct App {
    // ─────────────────────────────────────────────────────────────────────
    // Core Data
    // ─────────────────────────────────────────────────────────────────────
    store: Arc<Store>,
    pipeline: SearchPipeline,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    pub config: Config,
    logger: Option<Logger>,

    /// The items currently on screen, in display order.
    pub visible_items: Vec<Item>,

    /// Pre-search chronological list, stashed on search submit and restored
    /// on cancel so returning to the feed is instantaneous.
    snapshot: Option<Vec<Item>>,

    // ─────────────────────────────────────────────────────────────────────
    // Navigation & Selection
    // ─────────────────────────────────────────────────────────────────────
    pub mode: Mode,
    mode_stack: Vec<Mode>,

    /// Focused item tracked by id, never by index, so list replacement
    /// during a search doesn't silently jump the cursor to the wrong row.
    pub cursor_id: Option<String>,

    /// The item being viewed in Article mode.
    pub article_id: Option<String>,

    // ─────────────────────────────────────────────────────────────────────
    // Search
    // ─────────────────────────────────────────────────────────────────────
    pub search_input: String,
    last_query: Option<String>,

    // ─────────────────────────────────────────────────────────────────────
    // Feedback
    // Error bar shows at most one error, dismissed on any key press; status
    // bar shows transient hints (rerank progress, cancellation, degrade).
    // ─────────────────────────────────────────────────────────────────────
    pub error_message: Option<String>,
    pub status_message: Option<String>,

    // ─────────────────────────────────────────────────────────────────────
    // Viewport
    // ─────────────────────────────────────────────────────────────────────
    pub viewport_height: usize,
    pub scroll_offset: usize,

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────
    pub should_quit: bool,
}

impl App {
    // ─────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────

    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        config: Config,
        logger: Option<Logger>,
    ) -> Self {
        let viewport_height = config.default_viewport_height;
        let pipeline = SearchPipeline::new(store.clone(), embedder.clone(), reranker.clone());

        // Instant first paint: the last hour only. The full corpus is
        // chained in as a background load (see `initial_commands`) so
        // startup isn't gated on scanning the whole store.
        let since = chrono::Utc::now() - ChronoDuration::minutes(RECENT_ITEMS_WINDOW_MINUTES);
        let visible_items = store.get_items_since(since).unwrap_or_default();

        Self {
            store,
            pipeline,
            embedder,
            reranker,
            config,
            logger,
            visible_items,
            snapshot: None,
            mode: Mode::default(),
            mode_stack: Vec::new(),
            cursor_id: None,
            article_id: None,
            search_input: String::new(),
            last_query: None,
            error_message: None,
            status_message: None,
            viewport_height,
            scroll_offset: 0,
            should_quit: false,
        }
    }

    /// Commands to run once, right after construction: chains the
    /// full-corpus load behind the recent-items list already on screen.
    pub fn initial_commands(&self) -> Vec<Command> {
        vec![Command::LoadFullCorpus { limit: self.config.default_search_limit }]
    }

    fn log(&self, kind: &str, message: impl Into<String>) {
        if let Some(logger) = &self.logger {
            logger.log(LogEvent::new(kind, "ui", "").with_message(message.into()));
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Cursor & scroll
    // ─────────────────────────────────────────────────────────────

    pub fn focused_item(&self) -> Option<&Item> {
        match &self.cursor_id {
            Some(id) => self.visible_items.iter().find(|i| &i.id == id),
            None => self.visible_items.first(),
        }
    }

    fn cursor_index(&self) -> Option<usize> {
        let id = self.cursor_id.as_ref()?;
        self.visible_items.iter().position(|i| &i.id == id)
    }

    /// Replace the visible list, restoring the cursor to the previously
    /// focused id if it survived, otherwise clamping to the last valid
    /// index, otherwise 0. Call before mutating `visible_items`.
    fn replace_visible(&mut self, items: Vec<Item>) {
        let focused_id = self.cursor_id.clone();
        self.visible_items = items;

        self.cursor_id = match focused_id {
            Some(id) if self.visible_items.iter().any(|i| i.id == id) => Some(id),
            _ => self
                .visible_items
                .get(0)
                .map(|i| i.id.clone())
                .or(None),
        };
        self.clamp_scroll();
    }

    fn clamp_scroll(&mut self) {
        if self.visible_items.is_empty() {
            self.scroll_offset = 0;
            return;
        }
        let cursor = self.cursor_index().unwrap_or(0);
        if cursor < self.scroll_offset {
            self.scroll_offset = cursor;
        } else if cursor >= self.scroll_offset + self.viewport_height {
            self.scroll_offset = cursor + 1 - self.viewport_height;
        }
    }

    pub fn move_cursor_down(&mut self) {
        if self.visible_items.is_empty() {
            return;
        }
        let next = self.cursor_index().map(|i| (i + 1).min(self.visible_items.len() - 1)).unwrap_or(0);
        self.cursor_id = self.visible_items.get(next).map(|i| i.id.clone());
        self.clamp_scroll();
    }

    pub fn move_cursor_up(&mut self) {
        if self.visible_items.is_empty() {
            return;
        }
        let prev = self.cursor_index().map(|i| i.saturating_sub(1)).unwrap_or(0);
        self.cursor_id = self.visible_items.get(prev).map(|i| i.id.clone());
        self.clamp_scroll();
    }

    pub fn move_cursor_top(&mut self) {
        self.cursor_id = self.visible_items.first().map(|i| i.id.clone());
        self.clamp_scroll();
    }

    pub fn move_cursor_bottom(&mut self) {
        self.cursor_id = self.visible_items.last().map(|i| i.id.clone());
        self.clamp_scroll();
    }

    pub fn set_viewport_height(&mut self, height: usize) {
        self.viewport_height = height.max(1);
        self.clamp_scroll();
    }

    // ─────────────────────────────────────────────────────────────
    // Mode transitions
    // ─────────────────────────────────────────────────────────────

    fn push_mode(&mut self, mode: Mode) {
        self.mode_stack.push(self.mode);
        self.mode = mode;
    }

    /// `/` in List: focus the search input.
    pub fn enter_search(&mut self) {
        if self.mode != Mode::Search {
            self.push_mode(Mode::Search);
        }
        self.search_input.clear();
    }

    pub fn push_search_char(&mut self, c: char) {
        self.search_input.push(c);
    }

    pub fn pop_search_char(&mut self) {
        self.search_input.pop();
    }

    /// Enter in Search with non-empty text: submit via the pipeline,
    /// transition to Results.
    pub fn submit_search(&mut self) -> Vec<Command> {
        let query = self.search_input.trim().to_string();
        if query.is_empty() {
            return Vec::new();
        }

        if self.snapshot.is_none() {
            self.snapshot = Some(self.visible_items.clone());
        }

        let outcome = self.pipeline.submit(&query, self.config.default_search_limit);
        self.log("search.start", format!("query={query}"));

        self.replace_visible(outcome.fts_items);
        self.status_message = outcome.status;
        self.last_query = Some(query);
        self.mode = Mode::Results;
        self.mode_stack.clear();
        self.mode_stack.push(Mode::List);

        outcome.commands
    }

    /// Esc in Search: back to List unless a previous query exists (then
    /// Results).
    pub fn esc_in_search(&mut self) {
        if self.last_query.is_some() {
            self.mode = Mode::Results;
        } else {
            self.mode = Mode::List;
            self.restore_snapshot();
        }
        self.mode_stack.clear();
    }

    /// Esc in Results: if any stage is pending, cancel and stay in Results,
    /// re-sorting the surviving visible items by cosine similarity if a
    /// query embedding had already arrived; else clear the search and
    /// restore the pre-search snapshot.
    pub fn esc_in_results(&mut self) {
        if self.pipeline.has_pending() {
            let query_embedding = self.pipeline.current_query_embedding();
            let fts_embeddings = self.pipeline.current_fts_embeddings();
            self.pipeline.cancel();
            self.status_message = Some("Search cancelled".to_string());

            if let Some(query_vec) = query_embedding {
                let index = fts_embeddings.unwrap_or_else(EmbeddingIndex::empty);
                let ranked = ranker::cosine_rerank(&self.visible_items, &index, &query_vec);
                self.replace_visible(ranked);
            }
            return;
        }

        self.pipeline.cancel();
        self.last_query = None;
        self.mode = Mode::List;
        self.mode_stack.clear();
        self.restore_snapshot();
    }

    fn restore_snapshot(&mut self) {
        if let Some(items) = self.snapshot.take() {
            self.replace_visible(items);
        }
        self.status_message = None;
        self.error_message = None;
    }

    /// `m` ("more like this") on the focused item: seed a new search from
    /// its own embedding.
    pub fn more_like_this(&mut self) -> Vec<Command> {
        let Some(item) = self.focused_item().cloned() else {
            return Vec::new();
        };
        let Ok(Some(embedding)) = self.store.get_embedding(&item.id) else {
            self.status_message = Some("No embedding available for this item yet".to_string());
            return Vec::new();
        };

        if self.snapshot.is_none() {
            self.snapshot = Some(self.visible_items.clone());
        }

        let outcome = self.pipeline.submit_more_like_this(&item, embedding, self.config.default_search_limit);
        self.replace_visible(outcome.fts_items);
        self.last_query = Some(item.title.clone());
        self.mode = Mode::Results;
        self.mode_stack.clear();
        self.mode_stack.push(Mode::List);

        outcome.commands
    }

    /// Enter Article mode on the focused item and mark it read.
    pub fn open_article(&mut self) {
        let Some(item) = self.focused_item() else {
            return;
        };
        let id = item.id.clone();
        self.article_id = Some(id.clone());
        self.mark_read(&id);
        self.push_mode(Mode::Article);
    }

    pub fn exit_article(&mut self) {
        self.article_id = None;
        self.mode = self.mode_stack.pop().unwrap_or(Mode::List);
    }

    /// Toggle the browsing-history view (all read items, most recent first).
    pub fn enter_history(&mut self) {
        self.push_mode(Mode::History);
        let items = self.store.get_items(self.config.default_search_limit, true).unwrap_or_default();
        self.replace_visible(items.into_iter().filter(|i| i.read).collect());
    }

    pub fn exit_history(&mut self) {
        self.mode = self.mode_stack.pop().unwrap_or(Mode::List);
        let items = self.store.get_items(self.config.default_search_limit, true).unwrap_or_default();
        self.replace_visible(items);
    }

    // ─────────────────────────────────────────────────────────────
    // Item actions
    // ─────────────────────────────────────────────────────────────

    pub fn mark_read(&mut self, id: &str) {
        let _ = self.store.mark_read(id);
        if let Some(item) = self.visible_items.iter_mut().find(|i| i.id == id) {
            item.read = true;
        }
    }

    pub fn mark_focused_read(&mut self) {
        if let Some(id) = self.cursor_id.clone() {
            self.mark_read(&id);
        }
    }

    pub fn toggle_saved(&mut self) {
        let Some(id) = self.cursor_id.clone() else {
            return;
        };
        let saved = self.visible_items.iter().find(|i| i.id == id).map(|i| !i.saved).unwrap_or(true);
        let _ = self.store.mark_saved(&id, saved);
        if let Some(item) = self.visible_items.iter_mut().find(|i| i.id == id) {
            item.saved = saved;
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Pipeline message handling
    // ─────────────────────────────────────────────────────────────

    pub fn current_query_id(&self) -> Option<QueryId> {
        self.pipeline.current_query_id()
    }

    pub fn current_cancellation(&self) -> Option<CancellationHandle> {
        self.pipeline.current_cancellation()
    }

    pub fn store_handle(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn embedder_handle(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    pub fn reranker_handle(&self) -> Arc<dyn Reranker> {
        self.reranker.clone()
    }

    /// Apply a completed pipeline stage to the visible list. Returns any
    /// follow-on commands (e.g. rerank commands from a just-landed stage).
    pub fn handle_pipeline_message(&mut self, msg: PipelineMessage) -> Vec<Command> {
        let event = self.pipeline.handle_message(msg, &self.visible_items, self.viewport_height);

        match event {
            PipelineEvent::Stale => Vec::new(),
            PipelineEvent::PoolBuffered => Vec::new(),
            PipelineEvent::CosineAppliedToVisible { items } => {
                self.replace_visible(items);
                Vec::new()
            }
            PipelineEvent::VisibleReplacedWithPool { items, rerank_commands } => {
                self.replace_visible(items);
                rerank_commands
            }
            PipelineEvent::EmbeddingFailed { status } => {
                self.status_message = Some(status);
                Vec::new()
            }
            PipelineEvent::PoolFailed { status } => {
                self.error_message = Some(status);
                Vec::new()
            }
            PipelineEvent::RerankProgress { scored, total } => {
                self.status_message = Some(format!("Reranking {scored}/{total}..."));
                Vec::new()
            }
            PipelineEvent::RerankApplied { items } => {
                let reassembled = crate::search::ranker::reassemble_after_rerank(&self.visible_items, &items);
                self.replace_visible(reassembled);
                self.status_message = None;
                Vec::new()
            }
            PipelineEvent::RerankFailed { status } => {
                self.status_message = Some(status);
                Vec::new()
            }
            PipelineEvent::FullCorpusLoaded { items } => {
                // While a search is active, the full corpus replaces the
                // pre-search snapshot, never the currently visible results.
                if self.snapshot.is_some() {
                    self.snapshot = Some(items);
                } else {
                    self.replace_visible(items);
                }
                Vec::new()
            }
            PipelineEvent::FullCorpusFailed { status } => {
                self.status_message = Some(status);
                Vec::new()
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Error bar
    // ─────────────────────────────────────────────────────────────

    pub fn dismiss_error(&mut self) {
        self.error_message = None;
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_ready()
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::NoOpEmbedder;
    use crate::reranker::NoOpReranker;
    use chrono::Utc;

    fn item(id: &str, title: &str) -> Item {
        Item {
            id: id.to_string(),
            source_type: "rss".to_string(),
            source_name: "Test".to_string(),
            title: title.to_string(),
            summary: String::new(),
            url: format!("https://example.com/{id}"),
            author: String::new(),
            published_at: Utc::now(),
            fetched_at: Utc::now(),
            read: false,
            saved: false,
        }
    }

    fn test_app() -> App {
        let store = Arc::new(Store::open_in_memory_shared("app-test-db").unwrap());
        store
            .save_items(&[item("a", "Alpha"), item("b", "Bravo"), item("c", "Charlie")])
            .unwrap();
        let config = Config::default();
        App::new(store, Arc::new(NoOpEmbedder), Arc::new(NoOpReranker), config, None)
    }

    #[test]
    fn cursor_starts_on_first_item() {
        let app = test_app();
        assert_eq!(app.focused_item().unwrap().id, "a");
    }

    #[test]
    fn cursor_survives_list_replacement_by_id() {
        let mut app = test_app();
        app.move_cursor_down();
        assert_eq!(app.cursor_id.as_deref(), Some("b"));

        let reordered = vec![app.visible_items[2].clone(), app.visible_items[1].clone(), app.visible_items[0].clone()];
        app.replace_visible(reordered);

        assert_eq!(app.cursor_id.as_deref(), Some("b"));
    }

    #[test]
    fn cursor_clamps_to_last_index_when_focused_item_disappears() {
        let mut app = test_app();
        app.cursor_id = Some("b".to_string());
        app.replace_visible(vec![app.visible_items[0].clone()]);
        assert_eq!(app.cursor_id.as_deref(), Some("a"));
    }

    #[test]
    fn enter_search_then_esc_with_no_prior_query_returns_to_list() {
        let mut app = test_app();
        app.enter_search();
        assert_eq!(app.mode, Mode::Search);
        app.esc_in_search();
        assert_eq!(app.mode, Mode::List);
    }

    #[test]
    fn submit_empty_search_is_a_no_op() {
        let mut app = test_app();
        app.enter_search();
        let commands = app.submit_search();
        assert!(commands.is_empty());
        assert_eq!(app.mode, Mode::Search);
    }

    #[test]
    fn esc_in_results_restores_snapshot_when_nothing_pending() {
        let mut app = test_app();
        let before = app.visible_items.clone();
        app.enter_search();
        app.search_input = "alpha".to_string();
        app.submit_search();
        assert_eq!(app.mode, Mode::Results);

        app.esc_in_results();
        assert_eq!(app.mode, Mode::List);
        assert_eq!(app.visible_items, before);
    }

    #[test]
    fn esc_in_results_cancels_but_stays_when_pending() {
        let mut app = test_app();
        app.enter_search();
        app.search_input = "alpha".to_string();
        app.submit_search();
        assert!(app.pipeline.has_pending());

        app.esc_in_results();
        assert_eq!(app.mode, Mode::Results);
        assert!(!app.pipeline.has_pending());
    }

    struct FixedEmbedder(Vec<f32>);
    impl crate::embedder::Embedder for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            self.0.len()
        }
        fn is_ready(&self) -> bool {
            true
        }
        fn embed(&self, _text: &str) -> Result<crate::models::Embedding, crate::embedder::EmbedderError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn esc_in_results_resorts_by_cosine_when_embedding_already_arrived() {
        let store = Arc::new(Store::open_in_memory_shared("app-test-db-cosine").unwrap());
        store.save_items(&[item("a", "Alpha"), item("b", "Bravo Alpha")]).unwrap();
        store.save_embedding("a", &vec![0.0, 1.0]).unwrap();
        store.save_embedding("b", &vec![1.0, 0.0]).unwrap();

        let config = Config::default();
        let mut app = App::new(store, Arc::new(FixedEmbedder(vec![1.0, 0.0])), Arc::new(NoOpReranker), config, None);

        app.enter_search();
        app.search_input = "alpha".to_string();
        let commands = app.submit_search();
        assert!(app.pipeline.has_pending());

        let query_id = app.current_query_id().unwrap();
        let embed_command = commands
            .iter()
            .find(|c| matches!(c, Command::EmbedQuery { .. }))
            .expect("submit emits an EmbedQuery command");
        let Command::EmbedQuery { query_text, .. } = embed_command else { unreachable!() };
        let msg = PipelineMessage::QueryEmbedded {
            query_id,
            query: query_text.clone(),
            embedding: Some(vec![1.0, 0.0]),
            err: None,
        };
        app.handle_pipeline_message(msg);
        // Pool still pending; embedding has arrived.
        assert!(app.pipeline.has_pending());

        app.esc_in_results();
        assert_eq!(app.mode, Mode::Results);
        // "b" (embedding [1,0], cosine 1.0 with the query) ranks ahead of
        // "a" (embedding [0,1], cosine 0.0).
        assert_eq!(app.visible_items.first().map(|i| i.id.as_str()), Some("b"));
    }

    #[test]
    fn mark_read_updates_store_and_visible_item() {
        let mut app = test_app();
        app.mark_read("a");
        assert!(app.visible_items.iter().find(|i| i.id == "a").unwrap().read);
    }

    #[test]
    fn full_corpus_load_replaces_visible_when_idle() {
        let mut app = test_app();
        let items = vec![item("a", "Alpha"), item("b", "Bravo"), item("c", "Charlie"), item("d", "Delta")];
        let msg = PipelineMessage::FullCorpusLoaded { items: items.clone(), err: None };
        app.handle_pipeline_message(msg);
        assert_eq!(app.visible_items.len(), 4);
    }

    #[test]
    fn full_corpus_load_diverts_to_snapshot_during_active_search() {
        let mut app = test_app();
        app.enter_search();
        app.search_input = "alpha".to_string();
        app.submit_search();
        let before_search = app.visible_items.clone();

        let more_items = vec![item("a", "Alpha"), item("b", "Bravo"), item("c", "Charlie"), item("d", "Delta")];
        let msg = PipelineMessage::FullCorpusLoaded { items: more_items.clone(), err: None };
        app.handle_pipeline_message(msg);

        // Visible (search results) untouched; the full corpus landed in the
        // snapshot that's restored when the search is cancelled.
        assert_eq!(app.visible_items, before_search);
        app.esc_in_results();
        assert_eq!(app.visible_items.len(), 4);
    }

    #[test]
    fn open_article_marks_item_read_and_pushes_mode() {
        let mut app = test_app();
        app.open_article();
        assert_eq!(app.mode, Mode::Article);
        assert!(app.visible_items.iter().find(|i| i.id == "a").unwrap().read);
        app.exit_article();
        assert_eq!(app.mode, Mode::List);
    }
}
