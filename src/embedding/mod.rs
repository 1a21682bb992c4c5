//! Embedder adapter.
//!
//! Turns text into a fixed-length vector by calling an external embedding
//! service. Two providers are supported:
//!
//! - [`WorkersAiEmbedder`]: Workers AI text embedding models (`@cf/baai/bge-m3`)
//! - [`OpenAiEmbedder`]: any OpenAI-compatible `/v1/embeddings` endpoint
//!
//! An embedder never substitutes a zero vector: if the service fails or
//! returns nothing for the input, the call fails.

pub mod openai;
pub mod workers_ai;

pub use openai::OpenAiEmbedder;
pub use workers_ai::WorkersAiEmbedder;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use crate::cloudflare;
use crate::config::{EmbeddingConfig, EmbeddingProvider};

/// Errors that can occur while embedding text.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// The request could not be sent or the response could not be read.
    #[error("Embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with an error.
    #[error("Embedding service error: {0}")]
    Upstream(String),

    /// The service answered without a vector for the input.
    #[error("Embedding service returned no vector")]
    Empty,
}

impl From<cloudflare::ApiError> for EmbeddingError {
    fn from(err: cloudflare::ApiError) -> Self {
        match err {
            cloudflare::ApiError::Http(e) => Self::Request(e),
            other => Self::Upstream(other.to_string()),
        }
    }
}

/// Text embedding service.
#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    /// Embed a list of inputs, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vector = self
            .embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::Empty)?;
        if vector.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        Ok(vector)
    }
}

/// Build the configured embedder.
pub fn from_config(cfg: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match cfg.provider {
        EmbeddingProvider::WorkersAi => {
            let account_id = cfg
                .account_id
                .clone()
                .context("embedding.account_id is required for the workers-ai provider")?;
            Arc::new(WorkersAiEmbedder::new(
                cfg.base_url(),
                account_id,
                cfg.api_key.clone(),
                cfg.model.clone(),
            ))
        }
        EmbeddingProvider::OpenAi => Arc::new(OpenAiEmbedder::new(
            cfg.base_url(),
            cfg.api_key.clone(),
            cfg.model.clone(),
        )),
    };

    tracing::info!(
        name: "embedding.configured",
        provider = ?cfg.provider,
        model = %embedder.model_name(),
        "Embedding provider configured"
    );
    Ok(embedder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fixed(Vec<Vec<f32>>);

    #[async_trait]
    impl Embedder for Fixed {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(self.0.clone())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_embed_takes_first_vector() {
        let embedder = Fixed(vec![vec![0.5, 0.5]]);
        assert_eq!(embedder.embed("x").await.unwrap(), vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_missing_vector_is_an_error() {
        let embedder = Fixed(vec![]);
        assert!(matches!(
            embedder.embed("x").await,
            Err(EmbeddingError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_empty_vector_is_an_error() {
        let embedder = Fixed(vec![vec![]]);
        assert!(matches!(
            embedder.embed("x").await,
            Err(EmbeddingError::Empty)
        ));
    }
}
