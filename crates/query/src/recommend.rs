use index::{Embedder, SearchHit, VectorIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::retriever::{Retriever, SearchRequest};
use crate::scorer::{calculate_scores, rank, EntityScore, UNKNOWN_ENTITY};

pub const DEFAULT_SHORTLIST: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub ranking: Vec<EntityScore>,
    /// Full chunk set of each shortlisted entity, in ranking order.
    pub shortlist: Vec<ShortlistEntry>,
    pub trace: RecommendTrace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlistEntry {
    pub entity_name: String,
    pub score: u32,
    pub chunks: Vec<SearchHit>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendTrace {
    pub hits_retrieved: usize,
    pub entities_ranked: usize,
    pub chunks_expanded: usize,
}

/// search -> frequency scores -> ranking -> full entity info for the leaders.
pub struct Recommender<V, E> {
    retriever: Arc<Retriever<V, E>>,
    shortlist: usize,
}

impl<V: VectorIndex, E: Embedder> Recommender<V, E> {
    pub fn new(retriever: Arc<Retriever<V, E>>) -> Self {
        Self {
            retriever,
            shortlist: DEFAULT_SHORTLIST,
        }
    }

    pub fn with_shortlist(mut self, shortlist: usize) -> Self {
        self.shortlist = shortlist;
        self
    }

    pub async fn recommend(&self, request: &SearchRequest) -> Recommendation {
        // Step 1: Filtered dense search
        let hits = self.retriever.search(request).await;

        // Step 2: Frequency ranking
        let ranking = rank(calculate_scores(&hits));

        // Step 3: Expand the leaders; hits without an entity name cannot be looked up
        let leaders: Vec<&EntityScore> = ranking
            .iter()
            .filter(|entry| entry.entity_name != UNKNOWN_ENTITY)
            .take(self.shortlist)
            .collect();
        let names: Vec<String> = leaders.iter().map(|e| e.entity_name.clone()).collect();
        let mut info: BTreeMap<String, Vec<SearchHit>> =
            self.retriever.get_full_entity_info(&names).await;

        let shortlist: Vec<ShortlistEntry> = leaders
            .iter()
            .map(|entry| ShortlistEntry {
                entity_name: entry.entity_name.clone(),
                score: entry.score,
                chunks: info.remove(&entry.entity_name).unwrap_or_default(),
            })
            .collect();

        let trace = RecommendTrace {
            hits_retrieved: hits.len(),
            entities_ranked: ranking.len(),
            chunks_expanded: shortlist.iter().map(|e| e.chunks.len()).sum(),
        };
        info!(
            hits = trace.hits_retrieved,
            entities = trace.entities_ranked,
            shortlisted = shortlist.len(),
            "Recommendation complete"
        );

        Recommendation {
            ranking,
            shortlist,
            trace,
        }
    }
}
