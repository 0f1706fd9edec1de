//! Embedding cache to avoid re-embedding identical text

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct CacheEntry {
    embedding: Vec<f32>,
    expires_at: Instant,
}

/// In-memory embedding cache with TTL and a size bound
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

impl EmbeddingCache {
    /// Cache with a one hour TTL and room for 10k embeddings
    pub fn new() -> Self {
        Self::with_limits(Duration::from_secs(3600), 10_000)
    }

    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Get cached embedding if present and not expired
    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        if Instant::now() < entry.expires_at {
            Some(entry.embedding.clone())
        } else {
            None
        }
    }

    /// Store an embedding, evicting expired entries when full
    pub fn put(&self, key: String, embedding: Vec<f32>) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        let now = Instant::now();
        if entries.len() >= self.capacity {
            entries.retain(|_, e| now < e.expires_at);
        }
        if entries.len() >= self.capacity {
            return;
        }
        entries.insert(
            key,
            CacheEntry {
                embedding,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache key for an embedding of `text` by `model`
pub fn embedding_cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(16).map(|b| format!("{:02x}", b)).collect();
    format!("embed:{}:{}", model, hex)
}
