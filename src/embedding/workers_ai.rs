//! Workers AI embedding provider (`/accounts/{account}/ai/run/{model}`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cloudflare;

use super::{Embedder, EmbeddingError};

/// Embedder backed by a Workers AI text embedding model.
pub struct WorkersAiEmbedder {
    http: reqwest::Client,
    base_url: String,
    account_id: String,
    api_key: Option<String>,
    model: String,
}

impl std::fmt::Debug for WorkersAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkersAiEmbedder")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl WorkersAiEmbedder {
    pub fn new(
        base_url: String,
        account_id: String,
        api_key: Option<String>,
        model: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            account_id,
            api_key,
            model,
        }
    }

    fn endpoint(&self) -> String {
        cloudflare::account_url(
            &self.base_url,
            &self.account_id,
            &format!("ai/run/{}", self.model),
        )
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    text: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResult {
    #[serde(default)]
    data: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for WorkersAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut rb = self
            .http
            .post(self.endpoint())
            .json(&EmbeddingRequest { text: texts });
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }

        let result: EmbeddingResult = cloudflare::read_result(rb.send().await?).await?;
        if result.data.len() != texts.len() {
            return Err(EmbeddingError::Upstream(format!(
                "expected {} vectors, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        tracing::debug!(
            model = %self.model,
            inputs = texts.len(),
            dimensions = result.data.first().map_or(0, Vec::len),
            "Workers AI embeddings generated"
        );
        Ok(result.data)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
