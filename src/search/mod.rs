//! The three-stage search pipeline: lexical FTS, dense cosine reranking,
//! and cross-encoder reranking of the top candidates.

pub mod embedding_index;
pub mod pipeline;
pub mod ranker;

pub use embedding_index::{cosine_similarity, EmbeddingIndex};
pub use pipeline::{
    execute_command, CancellationHandle, Command, PipelineEvent, PipelineMessage, SearchPipeline, SubmitOutcome,
};
pub use ranker::FilterOutcome;
