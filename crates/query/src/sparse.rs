use index::{Tokenizer, TokenizerKind, VocabIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const BM25_K1: f64 = 1.5;
pub const BM25_B: f64 = 0.75;
pub const VOCAB_WEIGHT: f64 = 0.6;
pub const PHRASE_WEIGHT: f64 = 1.8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseScore {
    pub score: f64,
    pub predefined_match_count: usize,
}

/// BM25 term-frequency saturation for one term.
pub fn bm25_tf(tf: f64, dl: f64, avgdl: f64) -> f64 {
    if tf <= 0.0 {
        return 0.0;
    }
    let denominator = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * (dl / avgdl.max(1e-9)));
    if denominator <= 0.0 {
        return 0.0;
    }
    tf * (BM25_K1 + 1.0) / denominator
}

/// Non-overlapping occurrences of `phrase` in `text`, ignoring case; the count with
/// all spaces removed from both sides is used when it is larger.
pub fn count_phrase_occurrences(text: &str, phrase: &str) -> usize {
    let text = text.to_lowercase();
    let phrase = phrase.trim().to_lowercase();
    if phrase.is_empty() {
        return 0;
    }
    let direct = text.matches(phrase.as_str()).count();

    let compact_phrase: String = phrase.chars().filter(|c| !c.is_whitespace()).collect();
    if compact_phrase.is_empty() {
        return direct;
    }
    let compact_text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    direct.max(compact_text.matches(compact_phrase.as_str()).count())
}

/// Predefined phrases present in `query`, lowercased, each at most once, in list order.
pub fn match_predefined_phrases(query: &str, phrases: &[String]) -> Vec<String> {
    let query = query.to_lowercase();
    let compact_query: String = query.chars().filter(|c| !c.is_whitespace()).collect();

    let mut matched: Vec<String> = Vec::new();
    for phrase in phrases {
        let phrase = phrase.trim().to_lowercase();
        if phrase.is_empty() || matched.contains(&phrase) {
            continue;
        }
        let compact: String = phrase.chars().filter(|c| !c.is_whitespace()).collect();
        if query.contains(&phrase) || compact_query.contains(&compact) {
            matched.push(phrase);
        }
    }
    matched
}

/// Keyword relevance of a chunk to a query against the chunk's document vocabulary.
#[derive(Clone)]
pub struct SparseScorer {
    tokenizer: Arc<dyn Tokenizer>,
}

impl Default for SparseScorer {
    fn default() -> Self {
        Self::new(TokenizerKind::default().build())
    }
}

impl SparseScorer {
    /// `tokenizer` must be the one the vocabularies were built with.
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.tokenizer.tokenize(text)
    }

    pub fn score(
        &self,
        query: &str,
        chunk_text: &str,
        vocab: Option<&VocabIndex>,
        avgdl: f64,
    ) -> SparseScore {
        let Some(vocab) = vocab else {
            return SparseScore::default();
        };
        let chunk_tokens = self.tokenize(chunk_text);
        self.score_tokens(query, chunk_text, &chunk_tokens, vocab, avgdl)
    }

    /// Same as `score` with the chunk already tokenized.
    pub fn score_tokens(
        &self,
        query: &str,
        chunk_text: &str,
        chunk_tokens: &[String],
        vocab: &VocabIndex,
        avgdl: f64,
    ) -> SparseScore {
        let dl = chunk_tokens.len().max(1) as f64;
        let avgdl = avgdl.max(1.0);

        let mut chunk_tf: HashMap<&str, usize> = HashMap::new();
        for token in chunk_tokens {
            *chunk_tf.entry(token.as_str()).or_insert(0) += 1;
        }

        // Ordered maps keep float accumulation order fixed.
        let mut query_tf: BTreeMap<String, usize> = BTreeMap::new();
        for token in self.tokenize(query) {
            if vocab.contains(&token) {
                *query_tf.entry(token).or_insert(0) += 1;
            }
        }

        let mut vocab_total = 0.0;
        for (term, qtf) in &query_tf {
            let tf = chunk_tf.get(term.as_str()).copied().unwrap_or(0);
            if tf == 0 {
                continue;
            }
            vocab_total += *qtf as f64 * vocab.idf(term) * bm25_tf(tf as f64, dl, avgdl);
        }

        let matched = match_predefined_phrases(query, vocab.predefined_phrases());
        let mut phrase_tf: BTreeMap<&str, usize> = BTreeMap::new();
        for phrase in &matched {
            *phrase_tf.entry(phrase.as_str()).or_insert(0) += 1;
        }

        let mut phrase_total = 0.0;
        for (phrase, qtf) in phrase_tf {
            let tf = count_phrase_occurrences(chunk_text, phrase);
            if tf == 0 {
                continue;
            }
            phrase_total += qtf as f64 * vocab.idf(phrase) * bm25_tf(tf as f64, dl, avgdl);
        }

        SparseScore {
            score: VOCAB_WEIGHT * vocab_total + PHRASE_WEIGHT * phrase_total,
            predefined_match_count: matched.len(),
        }
    }
}
