use index::{Embedder, SearchHit, VectorIndex, VocabIndex, VocabStore};
use ingest::keys;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::judge::{Judgement, RelevanceJudge, Verdict};
use crate::retriever::{Retriever, SearchRequest};
use crate::sparse::SparseScorer;

/// Relevance of one hit to the query that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub query_context: String,
    pub total_score: u8,
    pub sparse_score: f64,
    pub predefined_match_count: usize,
    pub judgement: Judgement,
    pub reason: String,
}

impl Evaluation {
    pub fn to_value(&self) -> Value {
        json!({
            "query_context": self.query_context,
            "total_score": self.total_score,
            "sparse_score": self.sparse_score,
            "predefined_match_count": self.predefined_match_count,
            "judgement": self.judgement,
            "reason": self.reason,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredHit {
    pub hit: SearchHit,
    pub evaluation: Evaluation,
}

impl From<ScoredHit> for SearchHit {
    /// Attach the evaluation under `metadata["evaluation"]`; content is untouched.
    fn from(scored: ScoredHit) -> Self {
        let mut hit = scored.hit;
        hit.metadata
            .insert(keys::EVALUATION.to_string(), scored.evaluation.to_value());
        hit
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiQueryRequest {
    pub queries: Vec<String>,
    #[serde(default)]
    pub budget_ceiling: Option<i64>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Runs one search per related query and merges the union by relevance.
pub struct MultiQueryAggregator<V, E, J> {
    retriever: Arc<Retriever<V, E>>,
    scorer: SparseScorer,
    vocab_store: VocabStore,
    judge: Arc<J>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl<V: VectorIndex, E: Embedder, J: RelevanceJudge> MultiQueryAggregator<V, E, J> {
    pub fn new(
        retriever: Arc<Retriever<V, E>>,
        scorer: SparseScorer,
        vocab_store: VocabStore,
        judge: Arc<J>,
    ) -> Self {
        Self {
            retriever,
            scorer,
            vocab_store,
            judge,
        }
    }

    /// Every hit of every query is kept, duplicates included, ordered by
    /// `total_score` descending with retrieval order preserved among equals.
    pub async fn run(&self, request: &MultiQueryRequest) -> Vec<ScoredHit> {
        let queries: Vec<String> = request
            .queries
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();
        if queries.is_empty() {
            return Vec::new();
        }

        // Step 1: Embed all queries in one batch
        let Some(vectors) = self.retriever.embed_queries(&queries).await else {
            return Vec::new();
        };
        if vectors.len() != queries.len() {
            warn!(
                queries = queries.len(),
                vectors = vectors.len(),
                "Query embeddings do not line up with queries"
            );
            return Vec::new();
        }

        // Step 2: Dense search per query
        let mut per_query: Vec<(String, Vec<SearchHit>)> = Vec::with_capacity(queries.len());
        for (query, vector) in queries.into_iter().zip(vectors) {
            let search = SearchRequest {
                query: query.clone(),
                budget_ceiling: request.budget_ceiling,
                categories: request.categories.clone(),
                top_k: request.top_k,
                pre_filter_k: None,
            };
            let hits = self.retriever.search_by_vector(&vector, &search).await;
            debug!(query = %query, hits = hits.len(), "Query retrieved");
            per_query.push((query, hits));
        }

        // Step 3: Chunk lengths per source file for BM25 normalization
        let tokens: Vec<Vec<Vec<String>>> = per_query
            .iter()
            .map(|(_, hits)| hits.iter().map(|h| self.scorer.tokenize(&h.content)).collect())
            .collect();
        let avg_lengths = average_lengths(per_query.iter().zip(&tokens).flat_map(
            |((_, hits), hit_tokens)| {
                hits.iter()
                    .zip(hit_tokens)
                    .map(|(hit, chunk_tokens)| (source_file(hit), chunk_tokens.len()))
            },
        ));

        // Step 4: Vocabularies, loaded once per source file
        let mut vocabs: HashMap<String, Option<VocabIndex>> = HashMap::new();
        for file in avg_lengths.keys() {
            vocabs.insert(file.clone(), self.vocab_store.load(file).await);
        }

        // Step 5: Sparse score and judgement per hit
        let mut merged: Vec<ScoredHit> = Vec::new();
        for ((query, hits), hit_tokens) in per_query.into_iter().zip(tokens) {
            let verdicts = self.judge.judge(&query, &hits).await;
            for (i, (hit, chunk_tokens)) in hits.into_iter().zip(hit_tokens).enumerate() {
                let file = source_file(&hit);
                let avgdl = avg_lengths.get(&file).copied().unwrap_or(1.0);
                let sparse = match vocabs.get(&file).and_then(Option::as_ref) {
                    Some(vocab) => {
                        self.scorer
                            .score_tokens(&query, &hit.content, &chunk_tokens, vocab, avgdl)
                    }
                    None => Default::default(),
                };
                let verdict = verdicts
                    .get(i)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(Verdict::missing);

                merged.push(ScoredHit {
                    hit,
                    evaluation: Evaluation {
                        query_context: query.clone(),
                        total_score: verdict.total_score,
                        sparse_score: round2(sparse.score),
                        predefined_match_count: sparse.predefined_match_count,
                        judgement: verdict.judgement,
                        reason: verdict.reason,
                    },
                });
            }
        }

        // Step 6: Stable merge by relevance
        merged.sort_by(|a, b| b.evaluation.total_score.cmp(&a.evaluation.total_score));

        info!(
            queries = request.queries.len(),
            hits = merged.len(),
            "Multi-query search complete"
        );
        merged
    }
}

/// Mean token length per source file; empty chunks count as one token.
fn average_lengths(lengths: impl IntoIterator<Item = (String, usize)>) -> HashMap<String, f64> {
    let mut totals: HashMap<String, (usize, usize)> = HashMap::new();
    for (file, len) in lengths {
        let entry = totals.entry(file).or_insert((0, 0));
        entry.0 += len.max(1);
        entry.1 += 1;
    }
    totals
        .into_iter()
        .map(|(file, (total, count))| (file, total as f64 / count.max(1) as f64))
        .collect()
}

fn source_file(hit: &SearchHit) -> String {
    hit.metadata_str(keys::SOURCE_FILE)
        .unwrap_or_default()
        .to_string()
}
