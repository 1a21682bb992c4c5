//! Vector index boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors returned by a note index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Index request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Index service error: {0}")]
    Upstream(String),

    /// A vector does not match the dimensionality already stored.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("Failed to encode index records: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<crate::cloudflare::ApiError> for IndexError {
    fn from(err: crate::cloudflare::ApiError) -> Self {
        match err {
            crate::cloudflare::ApiError::Http(e) => Self::Request(e),
            other => Self::Upstream(other.to_string()),
        }
    }
}

/// One record written to the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Query tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub top_k: usize,
    pub return_metadata: bool,
}

impl QueryOptions {
    /// Top `k` matches with their metadata.
    #[must_use]
    pub fn with_metadata(top_k: usize) -> Self {
        Self {
            top_k,
            return_metadata: true,
        }
    }
}

/// One query hit, as reported by the index.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Nearest-neighbor storage for note vectors.
///
/// Matches are returned in the index's own order, most similar first.
#[async_trait]
pub trait NoteIndex: Send + Sync + std::fmt::Debug {
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<(), IndexError>;

    async fn query(
        &self,
        vector: &[f32],
        options: QueryOptions,
    ) -> Result<Vec<IndexMatch>, IndexError>;

    /// Backend name, for logging.
    fn name(&self) -> &'static str;
}
