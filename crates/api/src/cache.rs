use dashmap::DashMap;
use index::{non_blank, Embedder, EmbeddingError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Embedder wrapper remembering vectors by SHA-256 of the text.
pub struct CachedEmbedder<E> {
    inner: E,
    embeddings: DashMap<String, Vec<f32>>,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub embeddings_cached: usize,
    pub hits: usize,
    pub misses: usize,
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

impl<E: Embedder> CachedEmbedder<E> {
    /// `max_entries == 0` disables caching.
    pub fn new(inner: E, max_entries: usize) -> Self {
        Self {
            inner,
            embeddings: DashMap::new(),
            max_entries,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    fn store(&self, key: String, embedding: Vec<f32>) {
        if self.max_entries == 0 {
            return;
        }
        if self.embeddings.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .embeddings
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.embeddings.remove(&key);
            }
        }
        self.embeddings.insert(key, embedding);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            embeddings_cached: self.embeddings.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<E: Embedder> Embedder for CachedEmbedder<E> {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let wanted = non_blank(texts);
        let keys: Vec<String> = wanted.iter().map(|text| hash_text(text)).collect();

        let mut found: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        let mut missing_keys: Vec<&str> = Vec::new();
        for (text, key) in wanted.iter().zip(&keys) {
            if found.contains_key(key.as_str()) || missing_keys.contains(&key.as_str()) {
                continue;
            }
            match self.embeddings.get(key) {
                Some(entry) => {
                    found.insert(key.as_str(), entry.value().clone());
                }
                None => {
                    missing.push(text.to_string());
                    missing_keys.push(key.as_str());
                }
            }
        }
        self.hits.fetch_add(found.len(), Ordering::Relaxed);
        self.misses.fetch_add(missing.len(), Ordering::Relaxed);

        if !missing.is_empty() {
            let fresh = self.inner.embed(&missing).await?;
            if fresh.len() != missing.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: missing.len(),
                    actual: fresh.len(),
                });
            }
            for (key, vector) in missing_keys.into_iter().zip(fresh) {
                self.store(key.to_string(), vector.clone());
                found.insert(key, vector);
            }
        }

        keys.iter()
            .map(|key| {
                found.get(key.as_str()).cloned().ok_or_else(|| {
                    EmbeddingError::Decode(format!("no embedding for cached key {}", key))
                })
            })
            .collect()
    }
}
