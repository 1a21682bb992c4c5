//! In-process cosine index for local development and tests.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::index::{IndexError, IndexMatch, IndexRecord, NoteIndex, QueryOptions};

/// Brute-force cosine similarity index held in memory.
///
/// Nothing is persisted; the index is empty after a restart.
#[derive(Default)]
pub struct MemoryIndex {
    records: RwLock<Vec<IndexRecord>>,
}

impl std::fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("records", &"Dynamic")
            .finish()
    }
}

impl MemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl NoteIndex for MemoryIndex {
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<(), IndexError> {
        let mut stored = self.records.write().await;
        let expected = stored
            .first()
            .or_else(|| records.first())
            .map(|r| r.values.len());

        if let Some(expected) = expected {
            if let Some(bad) = records.iter().find(|r| r.values.len() != expected) {
                return Err(IndexError::Dimension {
                    expected,
                    actual: bad.values.len(),
                });
            }
        }

        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        options: QueryOptions,
    ) -> Result<Vec<IndexMatch>, IndexError> {
        let stored = self.records.read().await;
        if let Some(first) = stored.first() {
            if first.values.len() != vector.len() {
                return Err(IndexError::Dimension {
                    expected: first.values.len(),
                    actual: vector.len(),
                });
            }
        }

        let mut matches: Vec<IndexMatch> = stored
            .iter()
            .map(|r| IndexMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: options.return_metadata.then(|| r.metadata.clone()),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(options.top_k);
        Ok(matches)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
