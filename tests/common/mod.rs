//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::Stream;

use study_companion::dispatch::{Persona, TurnDispatcher};
use study_companion::embedding::{Embedder, EmbeddingError};
use study_companion::llm::{Generator, LlmDriver, LlmRequest, LlmSettings};
use study_companion::normalized::NormalizedEvent;
use study_companion::notes::{
    IndexError, IndexMatch, IndexRecord, MemoryIndex, NoteIndex, NoteStore, QueryOptions,
};

const DIMENSIONS: usize = 64;

/// Bag-of-words embedder: each lowercase word bumps one hashed bucket.
#[derive(Debug, Default)]
pub struct HashingEmbedder;

impl HashingEmbedder {
    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; DIMENSIONS];
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % DIMENSIONS as u64) as usize;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        } else {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}

/// Embedder whose service is always down.
#[derive(Debug, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Upstream("503 Service Unavailable".to_string()))
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// In-memory index that records every upsert.
#[derive(Debug, Default)]
pub struct RecordingIndex {
    inner: MemoryIndex,
    pub upserts: Mutex<Vec<IndexRecord>>,
}

impl RecordingIndex {
    pub fn saved_texts(&self) -> Vec<String> {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.metadata["text"].as_str().unwrap().to_string())
            .collect()
    }
}

#[async_trait]
impl NoteIndex for RecordingIndex {
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<(), IndexError> {
        self.upserts.lock().unwrap().extend(records.iter().cloned());
        self.inner.upsert(records).await
    }

    async fn query(
        &self,
        vector: &[f32],
        options: QueryOptions,
    ) -> Result<Vec<IndexMatch>, IndexError> {
        self.inner.query(vector, options).await
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Driver that replays fixed deltas and records every request.
#[derive(Debug, Default)]
pub struct ScriptedDriver {
    pub deltas: Vec<String>,
    pub fail: bool,
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedDriver {
    pub fn replying(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    async fn stream(
        &self,
        req: LlmRequest,
    ) -> anyhow::Result<Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>> {
        self.requests.lock().unwrap().push(req);
        if self.fail {
            anyhow::bail!("generation service returned 500 Internal Server Error");
        }
        let mut items: Vec<anyhow::Result<NormalizedEvent>> = self
            .deltas
            .iter()
            .map(|d| Ok(NormalizedEvent::MessageDelta { text: d.clone() }))
            .collect();
        items.push(Ok(NormalizedEvent::Done));
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

pub fn settings() -> LlmSettings {
    LlmSettings {
        base_url: "http://127.0.0.1:9".to_string(),
        api_key: None,
        model: "test-model".to_string(),
    }
}

pub fn dispatcher(
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn NoteIndex>,
    driver: Arc<ScriptedDriver>,
) -> TurnDispatcher {
    TurnDispatcher::new(
        NoteStore::new(embedder, index),
        Generator::with_driver(settings(), driver),
        Persona::study_guide(),
    )
}
