//! Dense-vector embedding providers.
//!
//! The pipeline depends on the `Embedder` trait, never on a concrete
//! provider, so the absence of any configured provider degrades to
//! FTS-only search rather than failing to start.

use crate::models::Embedding;

#[derive(Debug, Clone, PartialEq)]
pub enum EmbedderError {
    NotConfigured,
    RateLimited,
    ApiError(String),
    NetworkError(String),
    TextTooLong,
    Internal(String),
}

impl std::fmt::Display for EmbedderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedderError::NotConfigured => write!(f, "no embedding provider configured"),
            EmbedderError::RateLimited => write!(f, "embedding provider rate-limited the request"),
            EmbedderError::ApiError(msg) => write!(f, "embedding provider error: {msg}"),
            EmbedderError::NetworkError(msg) => write!(f, "network error contacting embedder: {msg}"),
            EmbedderError::TextTooLong => write!(f, "text exceeds embedder's input limit"),
            EmbedderError::Internal(msg) => write!(f, "internal embedder error: {msg}"),
        }
    }
}

impl std::error::Error for EmbedderError {}

/// A provider capable of turning text into a dense vector.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Vector length this embedder produces. Used to validate stored
    /// embeddings against a newly configured provider.
    fn dimensions(&self) -> usize;

    /// Whether this embedder is usable right now (configured, reachable).
    /// The pipeline checks this before attempting the embedding stage at
    /// all, so a missing API key degrades silently rather than erroring
    /// per-query.
    fn is_ready(&self) -> bool;

    fn embed(&self, text: &str) -> Result<Embedding, EmbedderError>;

    /// Default batch implementation calls `embed` once per text; providers
    /// with a real batch API should override this.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedderError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Always-unconfigured embedder, used when no provider is set up. Search
/// falls back to FTS-only ranking whenever `is_ready` is false.
#[derive(Debug, Default)]
pub struct NoOpEmbedder;

impl Embedder for NoOpEmbedder {
    fn name(&self) -> &str {
        "none"
    }

    fn dimensions(&self) -> usize {
        0
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn embed(&self, _text: &str) -> Result<Embedding, EmbedderError> {
        Err(EmbedderError::NotConfigured)
    }
}

#[cfg(feature = "http-providers")]
pub mod http {
    use super::{Embedder, EmbedderError};
    use crate::models::Embedding;
    use serde::{Deserialize, Serialize};

    /// OpenAI-compatible `/embeddings` endpoint client.
    pub struct HttpEmbedder {
        client: reqwest::blocking::Client,
        base_url: String,
        api_key: String,
        model: String,
        dimensions: usize,
    }

    impl HttpEmbedder {
        pub fn new(base_url: String, api_key: String, model: String, dimensions: usize) -> Self {
            Self {
                client: reqwest::blocking::Client::new(),
                base_url,
                api_key,
                model,
                dimensions,
            }
        }
    }

    #[derive(Serialize)]
    struct EmbeddingRequest<'a> {
        model: &'a str,
        input: &'a str,
    }

    #[derive(Deserialize)]
    struct EmbeddingResponse {
        data: Vec<EmbeddingDatum>,
    }

    #[derive(Deserialize)]
    struct EmbeddingDatum {
        embedding: Vec<f32>,
    }

    impl Embedder for HttpEmbedder {
        fn name(&self) -> &str {
            "http"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn is_ready(&self) -> bool {
            !self.api_key.is_empty()
        }

        fn embed(&self, text: &str) -> Result<Embedding, EmbedderError> {
            if self.api_key.is_empty() {
                return Err(EmbedderError::NotConfigured);
            }
            let response = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&EmbeddingRequest {
                    model: &self.model,
                    input: text,
                })
                .send()
                .map_err(|e| EmbedderError::NetworkError(e.to_string()))?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(EmbedderError::RateLimited);
            }
            if !response.status().is_success() {
                return Err(EmbedderError::ApiError(response.status().to_string()));
            }

            let parsed: EmbeddingResponse = response
                .json()
                .map_err(|e| EmbedderError::Internal(e.to_string()))?;
            parsed
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| EmbedderError::Internal("empty embedding response".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_embedder_is_never_ready() {
        let embedder = NoOpEmbedder;
        assert!(!embedder.is_ready());
        assert_eq!(embedder.embed("hello"), Err(EmbedderError::NotConfigured));
    }

    #[test]
    fn default_embed_batch_calls_embed_per_text() {
        struct Echo;
        impl Embedder for Echo {
            fn name(&self) -> &str {
                "echo"
            }
            fn dimensions(&self) -> usize {
                1
            }
            fn is_ready(&self) -> bool {
                true
            }
            fn embed(&self, text: &str) -> Result<Embedding, EmbedderError> {
                Ok(vec![text.len() as f32])
            }
        }

        let embedder = Echo;
        let result = embedder
            .embed_batch(&["a".to_string(), "bb".to_string()])
            .unwrap();
        assert_eq!(result, vec![vec![1.0], vec![2.0]]);
    }
}
