use index::{Embedder, MetadataFilter, SearchHit, VectorIndex};
use ingest::keys;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::filters::HitFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Candidates fetched before post-filtering.
    pub pre_filter_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            pre_filter_k: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Maximum acceptable `min_performance`; `None` disables the budget filter.
    #[serde(default)]
    pub budget_ceiling: Option<i64>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub pre_filter_k: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Self::default()
        }
    }
}

/// Dense search with budget and category post-filtering.
pub struct Retriever<V, E> {
    index: Arc<V>,
    embedder: Arc<E>,
    config: RetrievalConfig,
}

impl<V: VectorIndex, E: Embedder> Retriever<V, E> {
    pub fn new(index: Arc<V>, embedder: Arc<E>, config: RetrievalConfig) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<V> {
        &self.index
    }

    fn limits(&self, request: &SearchRequest) -> (usize, usize) {
        let top_k = request.top_k.unwrap_or(self.config.top_k);
        let pre_filter_k = request
            .pre_filter_k
            .unwrap_or(self.config.pre_filter_k)
            .max(top_k);
        (top_k, pre_filter_k)
    }

    /// Failures are logged and yield no hits.
    pub async fn search(&self, request: &SearchRequest) -> Vec<SearchHit> {
        if request.query.trim().is_empty() {
            return Vec::new();
        }

        // Step 1: Embed the query
        let vector = match self.embedder.embed_one(&request.query).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(operation = "embed_query", error = %e, "Query embedding failed");
                return Vec::new();
            }
        };

        self.search_by_vector(&vector, request).await
    }

    /// Embed several queries in one batch. `None` when the batch fails.
    pub async fn embed_queries(&self, queries: &[String]) -> Option<Vec<Vec<f32>>> {
        match self.embedder.embed(queries).await {
            Ok(vectors) => Some(vectors),
            Err(e) => {
                warn!(
                    operation = "embed_queries",
                    queries = queries.len(),
                    error = %e,
                    "Query batch embedding failed"
                );
                None
            }
        }
    }

    pub async fn search_by_vector(&self, vector: &[f32], request: &SearchRequest) -> Vec<SearchHit> {
        let (top_k, pre_filter_k) = self.limits(request);
        if top_k == 0 {
            return Vec::new();
        }

        // Step 2: Nearest-neighbour candidates
        let candidates = match self.index.search(vector, pre_filter_k, None).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(operation = "vector_search", error = %e, "Vector search failed");
                return Vec::new();
            }
        };
        let fetched = candidates.len();

        // Step 3: Budget and category post-filtering, distance order kept
        let filter = HitFilter::new(request.budget_ceiling, &request.categories);
        let accepted: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|hit| filter.accepts(hit))
            .take(top_k)
            .collect();

        if accepted.len() < top_k {
            debug!(
                fetched,
                accepted = accepted.len(),
                top_k,
                pre_filter_k,
                "Post-filtering left fewer than top_k hits"
            );
        }
        accepted
    }

    /// Every chunk of each named entity, unfiltered. Lookup failures yield an empty list.
    pub async fn get_full_entity_info(&self, entity_names: &[String]) -> BTreeMap<String, Vec<SearchHit>> {
        let mut info = BTreeMap::new();
        for name in entity_names {
            // Stored names are trimmed.
            let name = name.trim();
            if name.is_empty() || info.contains_key(name) {
                continue;
            }
            let filter = MetadataFilter::eq(keys::ENTITY_NAME, name);
            let chunks = match self.index.get(&filter).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(entity = %name, error = %e, "Entity lookup failed");
                    Vec::new()
                }
            };
            info.insert(name.to_string(), chunks);
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use index::{EmbeddingError, EmbeddingRecord, MemoryIndex};
    use ingest::{Chunk, ChunkType};
    use std::collections::BTreeMap as Map;

    /// Every text maps to the same unit vector; distances come from stored vectors.
    struct ConstEmbedder {
        fail: bool,
    }

    impl Embedder for ConstEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if self.fail {
                return Err(EmbeddingError::RateLimited);
            }
            Ok(index::non_blank(texts).iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct BrokenIndex;

    impl VectorIndex for BrokenIndex {
        async fn upsert(&self, _records: Vec<EmbeddingRecord>) -> Result<usize> {
            anyhow::bail!("down")
        }
        async fn search(&self, _: &[f32], _: usize, _: Option<&MetadataFilter>) -> Result<Vec<SearchHit>> {
            anyhow::bail!("down")
        }
        async fn get(&self, _: &MetadataFilter) -> Result<Vec<SearchHit>> {
            anyhow::bail!("down")
        }
        async fn count(&self) -> Result<usize> {
            anyhow::bail!("down")
        }
    }

    fn record(id: &str, entity: &str, min_performance: f64, categories: &str, angle: f32) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk: Chunk {
                id: id.to_string(),
                entity_name: entity.to_string(),
                entity_group: "KB".to_string(),
                chunk_type: ChunkType::Benefit,
                category: None,
                content: format!("{} benefit", entity),
                numeric_attributes: Map::from([("min_performance".to_string(), min_performance)]),
                tag_attributes: Map::from([("major_categories".to_string(), categories.to_string())]),
                metadata: Map::new(),
            },
            vector: vec![angle.cos(), angle.sin()],
        }
    }

    async fn seeded() -> Arc<MemoryIndex> {
        let index = Arc::new(MemoryIndex::new());
        index
            .upsert(vec![
                record("a", "Alpha", 300000.0, "Coffee,Shopping", 0.1),
                record("b", "Beta", 600000.0, "Coffee", 0.2),
                record("c", "Gamma", 200000.0, "Travel", 0.3),
                record("d", "Delta", 100000.0, "", 0.4),
                record("e", "Alpha", 300000.0, "Coffee", 0.5),
            ])
            .await
            .unwrap();
        index
    }

    fn retriever<V: VectorIndex>(index: Arc<V>, fail: bool) -> Retriever<V, ConstEmbedder> {
        Retriever::new(index, Arc::new(ConstEmbedder { fail }), RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_budget_and_category_filters() {
        let retriever = retriever(seeded().await, false);
        let request = SearchRequest {
            budget_ceiling: Some(500000),
            categories: vec!["coffee".to_string()],
            ..SearchRequest::new("커피 할인")
        };

        let hits = retriever.search(&request).await;
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        // b is over budget, c is the wrong category, d has no categories
        assert_eq!(ids, vec!["a", "d", "e"]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(hits.iter().all(|h| h.metadata["min_performance"] != 600000));
    }

    #[tokio::test]
    async fn test_top_k_caps_accepted_hits() {
        let retriever = retriever(seeded().await, false);
        let request = SearchRequest {
            top_k: Some(2),
            pre_filter_k: Some(1),
            ..SearchRequest::new("anything")
        };
        let hits = retriever.search(&request).await;
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failures_yield_empty_results() {
        assert!(retriever(seeded().await, true)
            .search(&SearchRequest::new("coffee"))
            .await
            .is_empty());
        assert!(retriever(Arc::new(BrokenIndex), false)
            .search(&SearchRequest::new("coffee"))
            .await
            .is_empty());
        assert!(retriever(seeded().await, false)
            .search(&SearchRequest::new("   "))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_full_entity_info_is_unfiltered() {
        let retriever = retriever(seeded().await, false);
        let names = vec!["Alpha".to_string(), "Nobody".to_string(), "Alpha".to_string()];
        let info = retriever.get_full_entity_info(&names).await;

        assert_eq!(info.len(), 2);
        let ids: Vec<&str> = info["Alpha"].iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "e"]);
        assert!(info["Nobody"].is_empty());

        let broken = self::retriever(Arc::new(BrokenIndex), false);
        assert!(broken.get_full_entity_info(&names).await["Alpha"].is_empty());
    }

    #[tokio::test]
    async fn test_full_entity_info_matches_trimmed_name() {
        let index = seeded().await;
        index
            .upsert(vec![record("f", "  Omega ", 100000.0, "Travel", 0.6)])
            .await
            .unwrap();
        let retriever = retriever(index, false);
        let names = vec![" Alpha ".to_string(), "Omega".to_string(), "  ".to_string()];
        let info = retriever.get_full_entity_info(&names).await;

        assert_eq!(info.len(), 2);
        let ids: Vec<&str> = info["Alpha"].iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "e"]);
        let ids: Vec<&str> = info["Omega"].iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["f"]);
    }
}
