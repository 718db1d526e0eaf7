pub mod aggregator;
pub mod filters;
pub mod judge;
pub mod recommend;
pub mod retriever;
pub mod scorer;
pub mod sparse;

pub use aggregator::{Evaluation, MultiQueryAggregator, MultiQueryRequest, ScoredHit};
pub use filters::{normalize_categories, CategoryParse, HitFilter};
pub use judge::{parse_verdicts, JudgeConfig, Judgement, OllamaJudge, RelevanceJudge, Unjudged, Verdict};
pub use recommend::{Recommendation, RecommendTrace, Recommender, ShortlistEntry, DEFAULT_SHORTLIST};
pub use retriever::{RetrievalConfig, Retriever, SearchRequest};
pub use scorer::{calculate_scores, rank, resolve_entity_name, EntityScore, UNKNOWN_ENTITY};
pub use sparse::{SparseScore, SparseScorer};
