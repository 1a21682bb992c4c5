//! Note store.
//!
//! A note is a piece of text saved by the user with `/learn`. The store
//! embeds it, files it in a vector index under a fresh UUID v4 and later
//! retrieves the closest notes for a query.
//!
//! # Backends
//!
//! - [`VectorizeIndex`]: managed Vectorize index (production)
//! - [`MemoryIndex`]: in-process cosine index (local development, tests)

pub mod index;
pub mod memory;
pub mod vectorize;

pub use index::{IndexError, IndexMatch, IndexRecord, NoteIndex, QueryOptions};
pub use memory::MemoryIndex;
pub use vectorize::VectorizeIndex;

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::{IndexConfig, IndexProvider};
use crate::embedding::{Embedder, EmbeddingError};

/// Metadata key holding the original note text.
pub const TEXT_KEY: &str = "text";

/// A saved note.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
}

impl Note {
    fn into_record(self) -> IndexRecord {
        let mut metadata = Map::new();
        metadata.insert(TEXT_KEY.to_string(), Value::String(self.text));
        IndexRecord {
            id: self.id,
            values: self.embedding,
            metadata,
        }
    }
}

/// A retrieved note with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredNote {
    pub text: String,
    pub score: f32,
}

/// Notes matching a query, most similar first.
pub type RetrievalResult = Vec<ScoredNote>;

#[derive(Debug, thiserror::Error)]
pub enum NoteStoreError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Embedder plus index.
#[derive(Debug, Clone)]
pub struct NoteStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn NoteIndex>,
}

impl NoteStore {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn NoteIndex>) -> Self {
        Self { embedder, index }
    }

    /// Embed `text` and file it as a new note. Returns the note id.
    ///
    /// Identical texts are stored as separate notes.
    pub async fn save(&self, text: &str) -> Result<String, NoteStoreError> {
        let embedding = self.embedder.embed(text).await?;
        let note = Note {
            id: Uuid::new_v4().to_string(),
            embedding,
            text: text.to_string(),
        };
        let id = note.id.clone();

        self.index.upsert(vec![note.into_record()]).await?;
        tracing::info!(
            name: "notes.saved",
            note_id = %id,
            index = self.index.name(),
            text_length = text.len(),
            "Note saved"
        );
        Ok(id)
    }

    /// Up to `k` notes closest to `query`, in the index's order.
    pub async fn search(&self, query: &str, k: usize) -> Result<RetrievalResult, NoteStoreError> {
        let vector = self.embedder.embed(query).await?;
        let matches = self
            .index
            .query(&vector, QueryOptions::with_metadata(k))
            .await?;

        let total = matches.len();
        let notes: RetrievalResult = matches
            .into_iter()
            .filter_map(|m| {
                let text = m.metadata?.get(TEXT_KEY)?.as_str()?.to_string();
                Some(ScoredNote {
                    text,
                    score: m.score,
                })
            })
            .collect();

        if notes.len() < total {
            tracing::warn!(
                skipped = total - notes.len(),
                "Index matches without note text were skipped"
            );
        }
        tracing::debug!(
            name: "notes.searched",
            index = self.index.name(),
            top_k = k,
            hits = notes.len(),
            "Notes searched"
        );
        Ok(notes)
    }
}

/// Build the configured note index.
pub fn index_from_config(cfg: &IndexConfig) -> anyhow::Result<Arc<dyn NoteIndex>> {
    let index: Arc<dyn NoteIndex> = match cfg.provider {
        IndexProvider::Memory => Arc::new(MemoryIndex::new()),
        IndexProvider::Vectorize => {
            let account_id = cfg
                .account_id
                .clone()
                .context("index.account_id is required for the vectorize provider")?;
            Arc::new(VectorizeIndex::new(
                cfg.base_url(),
                account_id,
                cfg.index_name.clone(),
                cfg.api_key.clone(),
            ))
        }
    };

    tracing::info!(
        name: "index.configured",
        provider = index.name(),
        index_name = %cfg.index_name,
        "Note index configured"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Constant;

    #[async_trait]
    impl Embedder for Constant {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn model_name(&self) -> &str {
            "constant"
        }
    }

    /// Index that replays canned matches and records upserts.
    #[derive(Debug, Default)]
    struct Canned {
        matches: Vec<IndexMatch>,
        upserts: Mutex<Vec<IndexRecord>>,
    }

    #[async_trait]
    impl NoteIndex for Canned {
        async fn upsert(&self, records: Vec<IndexRecord>) -> Result<(), IndexError> {
            self.upserts.lock().unwrap().extend(records);
            Ok(())
        }

        async fn query(
            &self,
            _vector: &[f32],
            options: QueryOptions,
        ) -> Result<Vec<IndexMatch>, IndexError> {
            Ok(self.matches.iter().take(options.top_k).cloned().collect())
        }

        fn name(&self) -> &'static str {
            "canned"
        }
    }

    fn hit(id: &str, score: f32, metadata: Option<Value>) -> IndexMatch {
        IndexMatch {
            id: id.to_string(),
            score,
            metadata: metadata.and_then(|v| v.as_object().cloned()),
        }
    }

    #[tokio::test]
    async fn test_save_upserts_text_metadata() {
        let index = Arc::new(Canned::default());
        let store = NoteStore::new(Arc::new(Constant), index.clone());

        let id = store.save("sliding window").await.unwrap();

        let upserts = index.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].id, id);
        assert_eq!(upserts[0].metadata[TEXT_KEY], "sliding window");
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_search_keeps_index_order_and_skips_textless() {
        let index = Canned {
            matches: vec![
                hit("a", 0.5, Some(json!({ "text": "first" }))),
                hit("b", 0.9, None),
                hit("c", 0.7, Some(json!({ "other": 1 }))),
                hit("d", 0.8, Some(json!({ "text": "second" }))),
            ],
            ..Canned::default()
        };
        let store = NoteStore::new(Arc::new(Constant), Arc::new(index));

        let notes = store.search("q", 4).await.unwrap();
        let texts: Vec<_> = notes.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(notes[1].score, 0.8);
    }

    #[test]
    fn test_memory_index_from_default_config() {
        let index = index_from_config(&IndexConfig::default()).unwrap();
        assert_eq!(index.name(), "memory");
    }
}
