use anyhow::Result;
use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::vector::{cosine_distance, EmbeddingRecord, MetadataFilter, SearchHit, VectorIndex};

struct StoredPoint {
    vector: Vec<f32>,
    content: String,
    metadata: Map<String, Value>,
}

/// Brute-force in-process index for local runs and tests.
#[derive(Default)]
pub struct MemoryIndex {
    points: DashMap<String, StoredPoint>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn hit(id: &str, point: &StoredPoint, distance: f32) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            content: point.content.clone(),
            metadata: point.metadata.clone(),
            distance,
        }
    }
}

impl VectorIndex for MemoryIndex {
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        for record in &records {
            record.chunk.validate()?;
            anyhow::ensure!(
                !record.vector.is_empty(),
                "Chunk {} has an empty vector",
                record.chunk.id
            );
        }

        let written = records.len();
        for record in records {
            let metadata = record.chunk.index_metadata();
            self.points.insert(
                record.chunk.id,
                StoredPoint {
                    vector: record.vector,
                    content: record.chunk.content,
                    metadata,
                },
            );
        }
        Ok(written)
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = self
            .points
            .iter()
            .filter(|entry| filter.is_none_or(|f| f.matches(&entry.value().metadata)))
            .map(|entry| {
                let distance = cosine_distance(vector, &entry.value().vector);
                Self::hit(entry.key(), entry.value(), distance)
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<SearchHit>> {
        let mut hits: Vec<SearchHit> = self
            .points
            .iter()
            .filter(|entry| filter.matches(&entry.value().metadata))
            .map(|entry| Self::hit(entry.key(), entry.value(), 0.0))
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.points.len())
    }
}
