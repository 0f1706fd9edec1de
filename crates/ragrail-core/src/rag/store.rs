//! Embedding stores

use super::TextSegment;
use crate::error::{RagRailError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::RwLock;

/// Nearest-neighbour search request
#[derive(Debug, Clone)]
pub struct EmbeddingSearchRequest {
    pub query_embedding: Vec<f32>,
    pub max_results: usize,
    pub min_score: f64,
}

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatch {
    /// Relevance in `0.0..=1.0`
    pub score: f64,
    pub embedding_id: String,
    pub segment: TextSegment,
}

/// Storage and similarity search over embedded segments
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Add one embedded segment, returning its id
    async fn add(&self, embedding: Vec<f32>, segment: TextSegment) -> Result<String>;

    /// Add many embedded segments; both vectors must have the same length
    async fn add_all(
        &self,
        embeddings: Vec<Vec<f32>>,
        segments: Vec<TextSegment>,
    ) -> Result<Vec<String>> {
        if embeddings.len() != segments.len() {
            return Err(RagRailError::InvalidInput(format!(
                "{} embeddings for {} segments",
                embeddings.len(),
                segments.len()
            )));
        }
        let mut ids = Vec::with_capacity(segments.len());
        for (embedding, segment) in embeddings.into_iter().zip(segments) {
            ids.push(self.add(embedding, segment).await?);
        }
        Ok(ids)
    }

    async fn search(&self, request: &EmbeddingSearchRequest) -> Result<Vec<EmbeddingMatch>>;

    async fn remove_all(&self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEmbedding {
    id: String,
    embedding: Vec<f32>,
    segment: TextSegment,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    entries: Vec<StoredEmbedding>,
}

/// Brute-force cosine search over embeddings held in memory
#[derive(Default)]
pub struct InMemoryEmbeddingStore {
    entries: RwLock<Vec<StoredEmbedding>>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write all entries as JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let entries = self
            .entries
            .read()
            .map_err(|_| RagRailError::Retrieval("embedding store lock poisoned".to_string()))?;
        let file = StoreFile {
            entries: entries.clone(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(&file)?)?;
        tracing::info!("Wrote {} embeddings to {}", file.entries.len(), path.display());
        Ok(())
    }

    /// Load a store previously written with `save_to_file`
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let file: StoreFile = serde_json::from_slice(&bytes)?;
        tracing::info!("Read {} embeddings from {}", file.entries.len(), path.display());
        Ok(Self {
            entries: RwLock::new(file.entries),
        })
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn add(&self, embedding: Vec<f32>, segment: TextSegment) -> Result<String> {
        let id = segment_id(&segment);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| RagRailError::Retrieval("embedding store lock poisoned".to_string()))?;

        if let Some(existing) = entries.first() {
            if existing.embedding.len() != embedding.len() {
                return Err(RagRailError::InvalidInput(format!(
                    "embedding has {} dimensions, store holds {}",
                    embedding.len(),
                    existing.embedding.len()
                )));
            }
        }

        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => entry.embedding = embedding,
            None => entries.push(StoredEmbedding {
                id: id.clone(),
                embedding,
                segment,
            }),
        }
        Ok(id)
    }

    async fn search(&self, request: &EmbeddingSearchRequest) -> Result<Vec<EmbeddingMatch>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| RagRailError::Retrieval("embedding store lock poisoned".to_string()))?;

        let mut matches: Vec<EmbeddingMatch> = entries
            .iter()
            .filter(|e| e.embedding.len() == request.query_embedding.len())
            .map(|e| EmbeddingMatch {
                score: relevance_score(cosine_similarity(&request.query_embedding, &e.embedding)),
                embedding_id: e.id.clone(),
                segment: e.segment.clone(),
            })
            .filter(|m| m.score >= request.min_score)
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(request.max_results);
        Ok(matches)
    }

    async fn remove_all(&self) -> Result<()> {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
        Ok(())
    }
}

/// Content-addressed id of a segment
pub fn segment_id(segment: &TextSegment) -> String {
    let mut hasher = Sha256::new();
    hasher.update(segment.text.as_bytes());
    for (k, v) in &segment.metadata {
        hasher.update([0u8]);
        hasher.update(k.as_bytes());
        hasher.update([0u8]);
        hasher.update(v.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .take(12)
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Map cosine similarity from `-1..=1` to `0..=1`
pub fn relevance_score(cosine: f64) -> f64 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(embedding: Vec<f32>, max_results: usize, min_score: f64) -> EmbeddingSearchRequest {
        EmbeddingSearchRequest {
            query_embedding: embedding,
            max_results,
            min_score,
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_relevance() {
        let store = InMemoryEmbeddingStore::new();
        store.add(vec![1.0, 0.0], TextSegment::new("east")).await.unwrap();
        store.add(vec![0.0, 1.0], TextSegment::new("north")).await.unwrap();
        store.add(vec![-1.0, 0.0], TextSegment::new("west")).await.unwrap();

        let hits = store.search(&request(vec![0.9, 0.1], 2, 0.0)).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|m| m.segment.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "north"]);
        assert!(hits[0].score > hits[1].score);

        let strict = store.search(&request(vec![1.0, 0.0], 10, 0.9)).await.unwrap();
        assert_eq!(strict.len(), 1);
        assert!((strict[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_identical_segment_reuses_id() {
        let store = InMemoryEmbeddingStore::new();
        let a = store.add(vec![1.0], TextSegment::new("same")).await.unwrap();
        let b = store.add(vec![1.0], TextSegment::new("same")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_rejected() {
        let store = InMemoryEmbeddingStore::new();
        store.add(vec![1.0, 0.0], TextSegment::new("a")).await.unwrap();
        let err = store.add(vec![1.0], TextSegment::new("b")).await;
        assert!(matches!(err, Err(RagRailError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("embeddings.json");

        let store = InMemoryEmbeddingStore::new();
        store
            .add(vec![0.5, 0.5], TextSegment::new("kept").with_meta("file_name", "a.md"))
            .await
            .unwrap();
        store.save_to_file(&path).unwrap();

        let loaded = InMemoryEmbeddingStore::load_from_file(&path).unwrap();
        let hits = loaded.search(&request(vec![0.5, 0.5], 1, 0.0)).await.unwrap();
        assert_eq!(hits[0].segment.metadata["file_name"], "a.md");
    }

    #[test]
    fn test_relevance_score_range() {
        assert_eq!(relevance_score(1.0), 1.0);
        assert_eq!(relevance_score(-1.0), 0.0);
        assert_eq!(relevance_score(0.0), 0.5);
    }
}
