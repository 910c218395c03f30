//! Orchestrates the three search stages (FTS → cosine → cross-encoder).
//!
//! Owns the active search's identity, cancellation handle, and per-stage
//! pending flags. Long-running work is represented as [`Command`] values;
//! [`execute_command`] is what actually performs that work (DB query, HTTP
//! call) and turns it into a [`PipelineMessage`] for [`SearchPipeline::handle_message`]
//! to fold back in. The pipeline itself never blocks and never holds a
//! lock across an await — all mutation happens synchronously inside
//! `submit`/`cancel`/`handle_message`, called from a single-threaded event
//! loop.

use crate::embedder::Embedder;
use crate::models::{Embedding, Item, QueryId};
use crate::reranker::Reranker;
use crate::search::embedding_index::EmbeddingIndex;
use crate::search::ranker;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How many items stage 1 (FTS) asks for.
pub const FTS_STAGE_LIMIT: usize = 50;

/// Default size of the background-loaded search pool.
pub const DEFAULT_POOL_LIMIT: usize = 500;

/// Minimum rerank top-K, regardless of viewport size.
const MIN_RERANK_K: usize = 30;
/// How many rows past the viewport get reranked, so scrolling a little
/// doesn't immediately run past reranked results.
const RERANK_K_SLACK: usize = 10;

/// A cooperative cancellation flag, cloned into every command spawned for
/// one search. Cheap to clone and check; never blocks.
#[derive(Clone, Debug, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The pipeline's view of one in-flight search. Dropped (replaced) whenever
/// a new search is submitted or the current one is cancelled.
struct SearchState {
    query_id: QueryId,
    query_text: String,
    cancellation: CancellationHandle,
    query_embedding: Option<Embedding>,
    /// Embeddings for the stage-1 (FTS) items, fetched synchronously
    /// alongside the FTS query at submit time — so that an embedding
    /// arriving before the pool can be applied to the currently-visible
    /// items without a blocking store read inside the message handler.
    fts_embeddings: EmbeddingIndex,
    pool_items: Option<Vec<Item>>,
    pool_embeddings: Option<EmbeddingIndex>,
    pool_pending: bool,
    embedding_pending: bool,
    rerank_pending: bool,
    rerank_candidates: Vec<Item>,
    rerank_scores: Vec<Option<f32>>,
    rerank_progress: usize,
}

/// Background work the runtime must execute and turn into a message. Values,
/// not closures — so they can be logged, retried, or dispatched onto
/// whatever executor the caller prefers.
#[derive(Debug, Clone)]
pub enum Command {
    LoadSearchPool { query_id: QueryId, limit: usize },
    EmbedQuery { query_id: QueryId, query_text: String },
    RerankBatch { query_id: QueryId, query_text: String, candidates: Vec<Item> },
    RerankEntry { query_id: QueryId, query_text: String, candidate: Item },
    /// Startup-only, orthogonal to any search: loads the full corpus after
    /// the recent-items list has already painted.
    LoadFullCorpus { limit: usize },
}

/// A completed (or failed) stage, addressed to whichever search emitted it.
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    SearchPoolLoaded {
        query_id: QueryId,
        items: Vec<Item>,
        embeddings: HashMap<String, Embedding>,
        err: Option<String>,
    },
    QueryEmbedded {
        query_id: QueryId,
        #[allow(dead_code)]
        query: String,
        embedding: Option<Embedding>,
        err: Option<String>,
    },
    EntryReranked {
        query_id: QueryId,
        item_id: String,
        score: Option<f32>,
        err: Option<String>,
    },
    RerankComplete {
        query_id: QueryId,
        #[allow(dead_code)]
        query: String,
        scores: Option<Vec<f32>>,
        err: Option<String>,
    },
    /// Reply to `Command::LoadFullCorpus`. Carries no query id: it isn't
    /// part of any search and is never subject to the staleness rule.
    FullCorpusLoaded { items: Vec<Item>, err: Option<String> },
}

/// What the UI should do in response to a submitted search or a handled
/// message. The pipeline never touches the UI's visible list directly —
/// it hands back what changed and lets the caller apply it.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Message belonged to a search that is no longer current; ignored.
    Stale,
    /// Pool arrived before the query embedding; nothing visible changes yet.
    PoolBuffered,
    /// Query embedding arrived before the pool; the currently-visible (FTS)
    /// items were re-ordered by cosine similarity using whatever embeddings
    /// are already available for them.
    CosineAppliedToVisible { items: Vec<Item> },
    /// Both pool and embedding are in, or one arrived after the other was
    /// already buffered: the visible list becomes the pool, cosine-ranked.
    /// `rerank_commands` is non-empty only when a reranker is available.
    VisibleReplacedWithPool { items: Vec<Item>, rerank_commands: Vec<Command> },
    /// Query embedding failed; FTS results remain visible.
    EmbeddingFailed { status: String },
    /// Pool load failed; visible list is untouched.
    PoolFailed { status: String },
    /// A per-entry rerank score arrived but the batch isn't complete yet.
    RerankProgress { scored: usize, total: usize },
    /// Rerank finished (batch or final per-entry score); these are the
    /// reranked top-K candidates — the caller reassembles them with
    /// whatever wasn't part of the candidate slice via
    /// [`ranker::reassemble_after_rerank`].
    RerankApplied { items: Vec<Item> },
    /// Rerank failed or returned a malformed result; cosine ranking stands.
    RerankFailed { status: String },
    /// The background full-corpus load finished. The caller decides where
    /// this goes: straight to the visible list when idle, or into the
    /// pre-search snapshot when a search is in flight.
    FullCorpusLoaded { items: Vec<Item> },
    /// The full-corpus load failed; the recent-items list already on screen
    /// is left as-is.
    FullCorpusFailed { status: String },
}

pub struct SearchPipeline {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    prefer_entry_scoring: bool,
    state: Option<SearchState>,
}

pub struct SubmitOutcome {
    pub query_id: QueryId,
    /// Stage-1 (FTS) results, to replace the visible list immediately.
    pub fts_items: Vec<Item>,
    pub status: Option<String>,
    pub commands: Vec<Command>,
}

impl SearchPipeline {
    pub fn new(store: Arc<Store>, embedder: Arc<dyn Embedder>, reranker: Arc<dyn Reranker>) -> Self {
        Self {
            store,
            embedder,
            reranker,
            prefer_entry_scoring: false,
            state: None,
        }
    }

    /// Use per-entry `RerankEntry` commands instead of a single
    /// `RerankBatch`, for rerankers scored one document at a time.
    pub fn with_entry_scoring(mut self, prefer_entry_scoring: bool) -> Self {
        self.prefer_entry_scoring = prefer_entry_scoring;
        self
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.state
            .as_ref()
            .map(|s| s.pool_pending || s.embedding_pending || s.rerank_pending)
            .unwrap_or(false)
    }

    pub fn current_query_id(&self) -> Option<QueryId> {
        self.state.as_ref().map(|s| s.query_id)
    }

    /// The cancellation handle for the active search, if any. Clone it into
    /// every [`Command`] spawned for that search so a later cancel or
    /// superseding submit stops in-flight work from mattering.
    pub fn current_cancellation(&self) -> Option<CancellationHandle> {
        self.state.as_ref().map(|s| s.cancellation.clone())
    }

    /// The active search's query embedding, if one has arrived yet. Used to
    /// re-sort the visible list by cosine similarity when a pending search
    /// is cancelled instead of just dropping back to FTS order.
    pub fn current_query_embedding(&self) -> Option<Embedding> {
        self.state.as_ref().and_then(|s| s.query_embedding.clone())
    }

    /// The active search's FTS-time embedding index, covering whatever is
    /// currently visible. See [`current_query_embedding`](Self::current_query_embedding).
    pub fn current_fts_embeddings(&self) -> Option<EmbeddingIndex> {
        self.state.as_ref().map(|s| s.fts_embeddings.clone())
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn reranker(&self) -> &Arc<dyn Reranker> {
        &self.reranker
    }

    /// Start a new search. Cancels any prior search first. Runs stage 1
    /// (FTS) synchronously and returns commands for stages 2 and 3 to run
    /// in the background.
    pub fn submit(&mut self, query_text: &str, pool_limit: usize) -> SubmitOutcome {
        self.cancel();

        let query_id = QueryId::new();
        let cancellation = CancellationHandle::new();

        let fts_items = self
            .store
            .search_fts(query_text, FTS_STAGE_LIMIT)
            .unwrap_or_default();
        let fts_ids: Vec<String> = fts_items.iter().map(|i| i.id.clone()).collect();
        let fts_embeddings = self
            .store
            .get_items_with_embeddings(&fts_ids)
            .map(EmbeddingIndex::new)
            .unwrap_or_else(|_| EmbeddingIndex::empty());

        self.state = Some(SearchState {
            query_id,
            query_text: query_text.to_string(),
            cancellation,
            query_embedding: None,
            fts_embeddings,
            pool_items: None,
            pool_embeddings: None,
            pool_pending: true,
            embedding_pending: true,
            rerank_pending: false,
            rerank_candidates: Vec::new(),
            rerank_scores: Vec::new(),
            rerank_progress: 0,
        });

        let status = if !self.embedder.is_ready() {
            Some("FTS only — configure embedder for semantic search".to_string())
        } else {
            None
        };

        SubmitOutcome {
            query_id,
            fts_items,
            status,
            commands: vec![
                Command::LoadSearchPool { query_id, limit: pool_limit },
                Command::EmbedQuery { query_id, query_text: query_text.to_string() },
            ],
        }
    }

    /// Start a "more like this" search seeded from an item's own embedding
    /// rather than a freshly embedded query string.
    pub fn submit_more_like_this(&mut self, seed: &Item, seed_embedding: Embedding, pool_limit: usize) -> SubmitOutcome {
        self.cancel();

        let query_id = QueryId::new();
        let cancellation = CancellationHandle::new();
        let fts_embeddings = EmbeddingIndex::new(HashMap::from([(seed.id.clone(), seed_embedding.clone())]));

        self.state = Some(SearchState {
            query_id,
            query_text: seed.title.clone(),
            cancellation,
            query_embedding: Some(seed_embedding),
            fts_embeddings,
            pool_items: None,
            pool_embeddings: None,
            pool_pending: true,
            embedding_pending: false,
            rerank_pending: false,
            rerank_candidates: Vec::new(),
            rerank_scores: Vec::new(),
            rerank_progress: 0,
        });

        SubmitOutcome {
            query_id,
            fts_items: vec![seed.clone()],
            status: None,
            commands: vec![Command::LoadSearchPool { query_id, limit: pool_limit }],
        }
    }

    /// Cancel the active search, if any. Returns whether one was active.
    pub fn cancel(&mut self) -> bool {
        match self.state.take() {
            Some(state) => {
                state.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    pub fn handle_message(&mut self, msg: PipelineMessage, current_visible: &[Item], viewport_height: usize) -> PipelineEvent {
        // Orthogonal to any search in flight: never subject to the query-id
        // staleness rule, so it's handled before that check even applies.
        let msg = match msg {
            PipelineMessage::FullCorpusLoaded { items, err: Some(e) } => {
                let _ = items;
                return PipelineEvent::FullCorpusFailed { status: format!("background load failed: {e}") };
            }
            PipelineMessage::FullCorpusLoaded { items, err: None } => {
                return PipelineEvent::FullCorpusLoaded { items };
            }
            other => other,
        };

        let msg_query_id = match &msg {
            PipelineMessage::SearchPoolLoaded { query_id, .. } => *query_id,
            PipelineMessage::QueryEmbedded { query_id, .. } => *query_id,
            PipelineMessage::EntryReranked { query_id, .. } => *query_id,
            PipelineMessage::RerankComplete { query_id, .. } => *query_id,
            PipelineMessage::FullCorpusLoaded { .. } => unreachable!("handled above by rebinding"),
        };

        if self.state.as_ref().map(|s| s.query_id) != Some(msg_query_id) {
            return PipelineEvent::Stale;
        }

        match msg {
            PipelineMessage::SearchPoolLoaded { items, embeddings, err, .. } => {
                self.handle_pool_loaded(items, embeddings, err, viewport_height)
            }
            PipelineMessage::QueryEmbedded { embedding, err, .. } => {
                self.handle_query_embedded(embedding, err, current_visible, viewport_height)
            }
            PipelineMessage::EntryReranked { item_id, score, err, .. } => {
                self.handle_entry_reranked(item_id, score, err)
            }
            PipelineMessage::RerankComplete { scores, err, .. } => self.handle_rerank_complete(scores, err),
        }
    }

    fn handle_pool_loaded(
        &mut self,
        items: Vec<Item>,
        embeddings: HashMap<String, Embedding>,
        err: Option<String>,
        viewport_height: usize,
    ) -> PipelineEvent {
        let state = self.state.as_mut().expect("checked by handle_message");

        if let Some(err) = err {
            state.pool_pending = false;
            return PipelineEvent::PoolFailed {
                status: format!("search pool failed to load: {err}"),
            };
        }

        state.pool_pending = false;
        let index = EmbeddingIndex::new(embeddings);

        match state.query_embedding.clone() {
            None => {
                // Embedding hasn't arrived; buffer the pool for later.
                state.pool_items = Some(items);
                state.pool_embeddings = Some(index);
                PipelineEvent::PoolBuffered
            }
            Some(query_vec) => {
                let ranked = ranker::cosine_rerank(&items, &index, &query_vec);
                let rerank_commands = self.start_rerank_stage(&ranked, viewport_height);
                PipelineEvent::VisibleReplacedWithPool { items: ranked, rerank_commands }
            }
        }
    }

    fn handle_query_embedded(
        &mut self,
        embedding: Option<Embedding>,
        err: Option<String>,
        current_visible: &[Item],
        viewport_height: usize,
    ) -> PipelineEvent {
        let state = self.state.as_mut().expect("checked by handle_message");

        if err.is_some() || embedding.is_none() {
            state.embedding_pending = false;
            state.pool_items = None;
            state.pool_embeddings = None;
            return PipelineEvent::EmbeddingFailed {
                status: "semantic ranking unavailable — showing lexical results".to_string(),
            };
        }

        let embedding = embedding.expect("checked above");
        state.embedding_pending = false;
        state.query_embedding = Some(embedding.clone());

        if let Some(pool) = state.pool_items.take() {
            let index = state.pool_embeddings.take().unwrap_or_else(EmbeddingIndex::empty);
            let ranked = ranker::cosine_rerank(&pool, &index, &embedding);
            let rerank_commands = self.start_rerank_stage(&ranked, viewport_height);
            return PipelineEvent::VisibleReplacedWithPool { items: ranked, rerank_commands };
        }

        // Pool hasn't arrived yet: give immediate feedback by reranking
        // whatever's already visible (the FTS results), using the
        // embeddings fetched alongside the FTS query at submit time — no
        // store read here, since this runs inside the message handler.
        let ranked = ranker::cosine_rerank(current_visible, &state.fts_embeddings, &embedding);
        PipelineEvent::CosineAppliedToVisible { items: ranked }
    }

    fn handle_entry_reranked(&mut self, item_id: String, score: Option<f32>, _err: Option<String>) -> PipelineEvent {
        let state = self.state.as_mut().expect("checked by handle_message");

        let Some(idx) = state.rerank_candidates.iter().position(|i| i.id == item_id) else {
            return PipelineEvent::RerankProgress {
                scored: state.rerank_progress,
                total: state.rerank_candidates.len(),
            };
        };

        if state.rerank_scores[idx].is_none() {
            state.rerank_scores[idx] = Some(score.unwrap_or(f32::MIN));
            state.rerank_progress += 1;
        }

        if state.rerank_progress == state.rerank_candidates.len() {
            let scores: Vec<f32> = state.rerank_scores.iter().map(|s| s.unwrap_or(f32::MIN)).collect();
            let ranked = ranker::apply_scores_as_order(&state.rerank_candidates, &scores);
            state.rerank_pending = false;
            state.rerank_candidates.clear();
            state.rerank_scores.clear();
            state.rerank_progress = 0;
            PipelineEvent::RerankApplied { items: ranked }
        } else {
            PipelineEvent::RerankProgress {
                scored: state.rerank_progress,
                total: state.rerank_candidates.len(),
            }
        }
    }

    fn handle_rerank_complete(&mut self, scores: Option<Vec<f32>>, err: Option<String>) -> PipelineEvent {
        let state = self.state.as_mut().expect("checked by handle_message");

        let fail = |state: &mut SearchState| {
            state.rerank_pending = false;
            state.rerank_candidates.clear();
            state.rerank_scores.clear();
            state.rerank_progress = 0;
        };

        match (scores, err) {
            (Some(scores), None) if scores.len() == state.rerank_candidates.len() => {
                let ranked = ranker::apply_scores_as_order(&state.rerank_candidates, &scores);
                fail(state);
                PipelineEvent::RerankApplied { items: ranked }
            }
            _ => {
                fail(state);
                PipelineEvent::RerankFailed {
                    status: "Rerank failed — showing cosine results".to_string(),
                }
            }
        }
    }

    /// Freeze the top-K of `ranked` as rerank candidates and build the
    /// commands to score them, if a reranker is configured.
    fn start_rerank_stage(&mut self, ranked: &[Item], viewport_height: usize) -> Vec<Command> {
        if !self.reranker.available() || ranked.is_empty() {
            return Vec::new();
        }

        let k = (viewport_height + RERANK_K_SLACK).max(MIN_RERANK_K).min(ranked.len());
        let candidates: Vec<Item> = ranked[..k].to_vec();

        let state = self.state.as_mut().expect("checked by handle_message");
        let query_id = state.query_id;
        let query_text = state.query_text.clone();
        state.rerank_pending = true;
        state.rerank_scores = vec![None; candidates.len()];
        state.rerank_progress = 0;
        state.rerank_candidates = candidates.clone();

        if self.prefer_entry_scoring {
            candidates
                .into_iter()
                .map(|candidate| Command::RerankEntry {
                    query_id,
                    query_text: query_text.clone(),
                    candidate,
                })
                .collect()
        } else {
            vec![Command::RerankBatch { query_id, query_text, candidates }]
        }
    }
}

/// Execute a [`Command`], producing the [`PipelineMessage`] it resolves to.
/// Meant to be run on a background task (e.g. `tokio::task::spawn_blocking`,
/// since the store and the reference HTTP providers are blocking calls);
/// the pipeline itself never calls this.
pub fn execute_command(
    command: Command,
    store: &Store,
    embedder: &dyn Embedder,
    reranker: &dyn Reranker,
    cancellation: &CancellationHandle,
) -> PipelineMessage {
    match command {
        Command::LoadSearchPool { query_id, limit } => {
            if cancellation.is_cancelled() {
                return PipelineMessage::SearchPoolLoaded {
                    query_id,
                    items: Vec::new(),
                    embeddings: HashMap::new(),
                    err: Some("cancelled".to_string()),
                };
            }
            match store.get_items(limit, true) {
                Ok(items) => {
                    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
                    match store.get_items_with_embeddings(&ids) {
                        Ok(embeddings) => PipelineMessage::SearchPoolLoaded { query_id, items, embeddings, err: None },
                        Err(e) => PipelineMessage::SearchPoolLoaded {
                            query_id,
                            items,
                            embeddings: HashMap::new(),
                            err: Some(e.to_string()),
                        },
                    }
                }
                Err(e) => PipelineMessage::SearchPoolLoaded {
                    query_id,
                    items: Vec::new(),
                    embeddings: HashMap::new(),
                    err: Some(e.to_string()),
                },
            }
        }
        Command::EmbedQuery { query_id, query_text } => {
            if cancellation.is_cancelled() {
                return PipelineMessage::QueryEmbedded {
                    query_id,
                    query: query_text,
                    embedding: None,
                    err: Some("cancelled".to_string()),
                };
            }
            if !embedder.is_ready() {
                return PipelineMessage::QueryEmbedded {
                    query_id,
                    query: query_text,
                    embedding: None,
                    err: Some("embedder not configured".to_string()),
                };
            }
            match embedder.embed(&query_text) {
                Ok(embedding) => PipelineMessage::QueryEmbedded {
                    query_id,
                    query: query_text,
                    embedding: Some(embedding),
                    err: None,
                },
                Err(e) => PipelineMessage::QueryEmbedded {
                    query_id,
                    query: query_text,
                    embedding: None,
                    err: Some(e.to_string()),
                },
            }
        }
        Command::RerankBatch { query_id, query_text, candidates } => {
            if cancellation.is_cancelled() {
                return PipelineMessage::RerankComplete {
                    query_id,
                    query: query_text,
                    scores: None,
                    err: Some("cancelled".to_string()),
                };
            }
            let docs: Vec<String> = candidates.iter().map(ranker::rerank_document_text).collect();
            match reranker.rerank(&query_text, &docs) {
                Ok(scores) => PipelineMessage::RerankComplete { query_id, query: query_text, scores: Some(scores), err: None },
                Err(e) => PipelineMessage::RerankComplete { query_id, query: query_text, scores: None, err: Some(e.to_string()) },
            }
        }
        Command::LoadFullCorpus { limit } => match store.get_items(limit, true) {
            Ok(items) => PipelineMessage::FullCorpusLoaded { items, err: None },
            Err(e) => PipelineMessage::FullCorpusLoaded { items: Vec::new(), err: Some(e.to_string()) },
        },
        Command::RerankEntry { query_id, query_text, candidate } => {
            if cancellation.is_cancelled() {
                return PipelineMessage::EntryReranked {
                    query_id,
                    item_id: candidate.id,
                    score: None,
                    err: Some("cancelled".to_string()),
                };
            }
            let doc = ranker::rerank_document_text(&candidate);
            match reranker.score(&query_text, &doc) {
                Ok(score) => PipelineMessage::EntryReranked { query_id, item_id: candidate.id, score: Some(score), err: None },
                Err(e) => PipelineMessage::EntryReranked {
                    query_id,
                    item_id: candidate.id,
                    score: None,
                    err: Some(e.to_string()),
                },
            }
        }
    }
}
