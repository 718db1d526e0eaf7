use anyhow::Result;
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;

/// A nearest-neighbour or lookup result. `distance >= 0`, smaller is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub distance: f32,
}

impl SearchHit {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// A chunk paired with its vector, handed to `VectorIndex::upsert` once.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Conjunction of exact-match conditions on metadata keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: Vec<(String, Value)>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(key: &str, value: impl Into<Value>) -> Self {
        Self::new().and(key, value)
    }

    pub fn and(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((key.to_string(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

/// Storage for (chunk, vector, metadata) triples.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records keyed by chunk id. Returns the number written.
    fn upsert(&self, records: Vec<EmbeddingRecord>) -> impl Future<Output = Result<usize>> + Send;

    /// Up to `k` nearest records, ascending distance.
    fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> impl Future<Output = Result<Vec<SearchHit>>> + Send;

    /// Every record matching `filter`, ordered by id, with distance 0.
    fn get(&self, filter: &MetadataFilter) -> impl Future<Output = Result<Vec<SearchHit>>> + Send;

    fn count(&self) -> impl Future<Output = Result<usize>> + Send;
}

/// `1 - cosine similarity`, clamped to `[0, 2]`; zero vectors are at distance 1.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_requires_every_condition() {
        let metadata = json!({"entity_name": "Deep Dream", "chunk_type": "benefit"});
        let metadata = metadata.as_object().unwrap();

        assert!(MetadataFilter::new().matches(metadata));
        assert!(MetadataFilter::eq("entity_name", "Deep Dream").matches(metadata));
        assert!(!MetadataFilter::eq("entity_name", "Deep Dream")
            .and("chunk_type", "overview")
            .matches(metadata));
        assert!(!MetadataFilter::eq("missing", "x").matches(metadata));
    }

    #[test]
    fn test_cosine_distance_bounds() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
