//! Cross-encoder reranking providers.
//!
//! Like `Embedder`, the pipeline only ever holds a `&dyn Reranker`. The
//! no-op implementation reports itself unavailable, which tells the
//! pipeline to freeze the cosine-stage ordering as final rather than
//! attempt a rerank that can't happen.

#[derive(Debug, Clone, PartialEq)]
pub enum RerankerError {
    NotConfigured,
    Timeout,
    ApiError(String),
    NetworkError(String),
    Internal(String),
}

impl std::fmt::Display for RerankerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RerankerError::NotConfigured => write!(f, "no reranker configured"),
            RerankerError::Timeout => write!(f, "reranker request timed out"),
            RerankerError::ApiError(msg) => write!(f, "reranker error: {msg}"),
            RerankerError::NetworkError(msg) => write!(f, "network error contacting reranker: {msg}"),
            RerankerError::Internal(msg) => write!(f, "internal reranker error: {msg}"),
        }
    }
}

impl std::error::Error for RerankerError {}

/// A provider capable of scoring how relevant each of a batch of documents
/// is to a query.
pub trait Reranker: Send + Sync {
    /// Whether this reranker is usable right now. The pipeline checks this
    /// before entering the rerank stage, so an unconfigured reranker simply
    /// means the cosine-stage ordering is final, not an error.
    fn available(&self) -> bool;

    /// Score every document against the query; `scores.len()` must equal
    /// `docs.len()` on success.
    fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>, RerankerError>;

    /// Score a single document. Default implementation delegates to the
    /// batch call with one document; providers with a true per-item scoring
    /// API should override this.
    fn score(&self, query: &str, doc: &str) -> Result<f32, RerankerError> {
        let scores = self.rerank(query, std::slice::from_ref(&doc.to_string()))?;
        scores
            .into_iter()
            .next()
            .ok_or_else(|| RerankerError::Internal("empty score response".to_string()))
    }
}

/// Always-unavailable reranker, used when no provider is configured.
#[derive(Debug, Default)]
pub struct NoOpReranker;

impl Reranker for NoOpReranker {
    fn available(&self) -> bool {
        false
    }

    fn rerank(&self, _query: &str, _docs: &[String]) -> Result<Vec<f32>, RerankerError> {
        Err(RerankerError::NotConfigured)
    }
}

#[cfg(feature = "http-providers")]
pub mod http {
    use super::{Reranker, RerankerError};
    use serde::{Deserialize, Serialize};

    /// Cross-encoder rerank endpoint client (Cohere/Jina-style `/rerank` API).
    pub struct HttpReranker {
        client: reqwest::blocking::Client,
        base_url: String,
        api_key: String,
        model: String,
    }

    impl HttpReranker {
        pub fn new(base_url: String, api_key: String, model: String) -> Self {
            Self {
                client: reqwest::blocking::Client::new(),
                base_url,
                api_key,
                model,
            }
        }
    }

    #[derive(Serialize)]
    struct RerankRequest<'a> {
        model: &'a str,
        query: &'a str,
        documents: &'a [String],
    }

    #[derive(Deserialize)]
    struct RerankResponse {
        results: Vec<RerankResult>,
    }

    #[derive(Deserialize)]
    struct RerankResult {
        index: usize,
        relevance_score: f32,
    }

    impl Reranker for HttpReranker {
        fn available(&self) -> bool {
            !self.api_key.is_empty()
        }

        fn rerank(&self, query: &str, docs: &[String]) -> Result<Vec<f32>, RerankerError> {
            if self.api_key.is_empty() {
                return Err(RerankerError::NotConfigured);
            }
            let response = self
                .client
                .post(format!("{}/rerank", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&RerankRequest {
                    model: &self.model,
                    query,
                    documents: docs,
                })
                .send()
                .map_err(|e| RerankerError::NetworkError(e.to_string()))?;

            if response.status() == reqwest::StatusCode::REQUEST_TIMEOUT {
                return Err(RerankerError::Timeout);
            }
            if !response.status().is_success() {
                return Err(RerankerError::ApiError(response.status().to_string()));
            }

            let parsed: RerankResponse = response
                .json()
                .map_err(|e| RerankerError::Internal(e.to_string()))?;

            let mut scores = vec![0.0f32; docs.len()];
            for result in parsed.results {
                if let Some(slot) = scores.get_mut(result.index) {
                    *slot = result.relevance_score;
                }
            }
            Ok(scores)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_reranker_is_never_available() {
        let reranker = NoOpReranker;
        assert!(!reranker.available());
        assert_eq!(
            reranker.rerank("q", &["doc".to_string()]),
            Err(RerankerError::NotConfigured)
        );
    }

    #[test]
    fn default_score_delegates_to_batch_rerank() {
        struct LengthScorer;
        impl Reranker for LengthScorer {
            fn available(&self) -> bool {
                true
            }
            fn rerank(&self, _query: &str, docs: &[String]) -> Result<Vec<f32>, RerankerError> {
                Ok(docs.iter().map(|d| d.len() as f32).collect())
            }
        }

        let reranker = LengthScorer;
        assert_eq!(reranker.score("q", "abc").unwrap(), 3.0);
    }
}
