use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::tokenizer::Tokenizer;

/// Card benefit categories and pet-health conditions matched as whole phrases.
pub const DEFAULT_PREDEFINED_PHRASES: &[&str] = &[
    // card benefits
    "커피", "카페", "편의점", "대중교통", "택시", "주유", "통신", "온라인 쇼핑", "해외 결제",
    "공항 라운지", "영화", "배달", "대형마트", "구독", "포인트 적립", "캐시백", "연회비",
    // pet health
    "슬관절탈구", "고관절탈구", "슬개골 탈구", "고관절 이형성", "십자 인대 손상 파열", "골절",
    "관절염", "피부염", "알레르기", "위염", "장염", "췌장염", "심장질환", "신장질환", "종양",
    "악성종양", "당뇨병", "백내장", "녹내장", "각막염", "결막염", "치과질환", "외이염",
    "이물섭취", "기생충 질환",
];

pub fn default_predefined_phrases() -> Vec<String> {
    DEFAULT_PREDEFINED_PHRASES.iter().map(|p| p.to_string()).collect()
}

/// Per-document term vocabulary with optional IDF weights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VocabIndex {
    terms: Vec<String>,
    lookup: HashMap<String, usize>,
    idf: Option<HashMap<String, f64>>,
    predefined_phrases: Vec<String>,
}

/// On-disk shape: `{vocab, idf?, predefined_words, total_tokens}`.
#[derive(Debug, Serialize, Deserialize)]
struct VocabFile {
    vocab: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    idf: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    predefined_words: Vec<String>,
    #[serde(default)]
    total_tokens: usize,
}

impl VocabIndex {
    /// Build the vocabulary of one source document from its chunk or page texts.
    pub fn build<'a>(
        texts: impl IntoIterator<Item = &'a str>,
        predefined_phrases: &[String],
        tokenizer: &dyn Tokenizer,
    ) -> Self {
        let mut vocab = Self {
            predefined_phrases: predefined_phrases.to_vec(),
            ..Self::default()
        };

        for text in texts {
            for token in tokenizer.tokenize(text) {
                vocab.insert(token);
            }
            let lower = text.to_lowercase();
            for phrase in predefined_phrases {
                let phrase = phrase.to_lowercase();
                if lower.contains(&phrase) {
                    vocab.insert(phrase);
                }
            }
        }

        for phrase in predefined_phrases {
            vocab.insert(phrase.to_lowercase());
        }

        vocab
    }

    fn insert(&mut self, term: String) {
        if term.is_empty() || self.lookup.contains_key(&term) {
            return;
        }
        self.lookup.insert(term.clone(), self.terms.len());
        self.terms.push(term);
    }

    /// BM25 IDF over `texts`, one text per document unit:
    /// `ln(1 + (N - df + 0.5) / (df + 0.5))`.
    pub fn compute_idf<'a>(
        &mut self,
        texts: impl IntoIterator<Item = &'a str>,
        tokenizer: &dyn Tokenizer,
    ) {
        let units: Vec<(HashSet<String>, String)> = texts
            .into_iter()
            .map(|text| {
                let tokens = tokenizer.tokenize(text).into_iter().collect();
                (tokens, text.to_lowercase())
            })
            .collect();
        let n = units.len() as f64;

        let idf = self
            .terms
            .iter()
            .map(|term| {
                let df = units
                    .iter()
                    .filter(|(tokens, lower)| tokens.contains(term) || lower.contains(term.as_str()))
                    .count() as f64;
                let weight = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                (term.clone(), weight)
            })
            .collect();

        self.idf = Some(idf);
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn contains(&self, term: &str) -> bool {
        self.lookup.contains_key(term)
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.lookup.get(term).copied()
    }

    /// Terms in first-seen order.
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn predefined_phrases(&self) -> &[String] {
        &self.predefined_phrases
    }

    pub fn has_idf(&self) -> bool {
        self.idf.is_some()
    }

    fn term_idf(&self, term: &str) -> Option<f64> {
        match &self.idf {
            Some(idf) => idf.get(term).copied(),
            None => self.contains(term).then_some(1.0),
        }
    }

    /// IDF of `term`; a multi-word term falls back to the mean IDF of its known
    /// whitespace sub-tokens, and to 0.0 when none are known.
    pub fn idf(&self, term: &str) -> f64 {
        let term = term.to_lowercase();
        if let Some(weight) = self.term_idf(&term) {
            return weight;
        }

        let parts: Vec<f64> = term
            .split_whitespace()
            .filter_map(|part| self.term_idf(part))
            .collect();
        if parts.is_empty() {
            0.0
        } else {
            parts.iter().sum::<f64>() / parts.len() as f64
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let file = VocabFile {
            vocab: self
                .terms
                .iter()
                .enumerate()
                .map(|(i, term)| (term.clone(), i))
                .collect(),
            idf: self
                .idf
                .as_ref()
                .map(|idf| idf.iter().map(|(k, v)| (k.clone(), *v)).collect()),
            predefined_words: self.predefined_phrases.clone(),
            total_tokens: self.terms.len(),
        };
        Ok(serde_json::to_string(&file)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: VocabFile = serde_json::from_str(json).context("Malformed vocab file")?;

        let mut ordered: Vec<(String, usize)> = file.vocab.into_iter().collect();
        ordered.sort_by_key(|(_, index)| *index);

        let mut vocab = Self {
            predefined_phrases: file.predefined_words,
            idf: file.idf.map(|idf| idf.into_iter().collect()),
            ..Self::default()
        };
        for (term, _) in ordered {
            vocab.insert(term);
        }
        Ok(vocab)
    }
}

/// Vocabulary files under `{artifacts_dir}/{stem}/vocab.json`.
#[derive(Debug, Clone)]
pub struct VocabStore {
    artifacts_dir: PathBuf,
}

impl VocabStore {
    pub const FILE_NAME: &'static str = "vocab.json";

    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
        }
    }

    pub fn path_for(&self, stem: &str) -> PathBuf {
        self.artifacts_dir.join(stem).join(Self::FILE_NAME)
    }

    pub async fn save(&self, stem: &str, vocab: &VocabIndex) -> Result<PathBuf> {
        let path = self.path_for(stem);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context(format!("Failed to create vocab dir: {:?}", parent))?;
        }
        fs::write(&path, vocab.to_json()?)
            .await
            .context(format!("Failed to write vocab: {:?}", path))?;
        debug!(stem, terms = vocab.len(), "Saved vocabulary");
        Ok(path)
    }

    /// `None` when no vocabulary exists for `stem` or it cannot be read.
    pub async fn load(&self, stem: &str) -> Option<VocabIndex> {
        if stem.is_empty() {
            return None;
        }
        let path = self.path_for(stem);
        if !path.exists() {
            return None;
        }
        match Self::read(&path).await {
            Ok(vocab) => Some(vocab),
            Err(e) => {
                warn!(path = ?path, error = %e, "Ignoring unreadable vocabulary");
                None
            }
        }
    }

    async fn read(path: &Path) -> Result<VocabIndex> {
        let json = fs::read_to_string(path)
            .await
            .context(format!("Failed to read vocab: {:?}", path))?;
        VocabIndex::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{ContentWordTokenizer, WhitespaceTokenizer};

    fn phrases(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_terms_indexed_in_first_seen_order() {
        let vocab = VocabIndex::build(
            ["coffee discount coffee", "transit discount"],
            &[],
            &WhitespaceTokenizer,
        );
        assert_eq!(vocab.terms(), &["coffee", "discount", "transit"]);
        assert_eq!(vocab.index_of("transit"), Some(2));
    }

    #[test]
    fn test_predefined_phrases_always_present() {
        let vocab = VocabIndex::build(
            ["슬개골 탈구 보장"],
            &phrases(&["슬개골 탈구", "Pet Insurance"]),
            &WhitespaceTokenizer,
        );
        // found in text: inserted right after the text's own tokens
        assert_eq!(vocab.index_of("슬개골 탈구"), Some(3));
        assert_eq!(vocab.index_of("pet insurance"), Some(4));
        assert_eq!(vocab.len(), 5);
    }

    #[test]
    fn test_idf_defaults_to_one_and_averages_sub_tokens() {
        let vocab = VocabIndex::build(["coffee discount"], &[], &WhitespaceTokenizer);
        assert_eq!(vocab.idf("coffee"), 1.0);
        assert_eq!(vocab.idf("coffee shop"), 1.0);
        assert_eq!(vocab.idf("tea"), 0.0);
    }

    #[test]
    fn test_compute_idf_prefers_rare_terms() {
        let texts = ["coffee discount", "coffee transit", "coffee lounge"];
        let mut vocab = VocabIndex::build(texts, &[], &WhitespaceTokenizer);
        vocab.compute_idf(texts, &WhitespaceTokenizer);

        assert!(vocab.has_idf());
        assert!(vocab.idf("lounge") > vocab.idf("coffee"));
        assert!(vocab.idf("coffee") > 0.0);
        let mean = (vocab.idf("coffee") + vocab.idf("lounge")) / 2.0;
        assert!((vocab.idf("coffee lounge") - mean).abs() < 1e-12);
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let texts = ["스타벅스에서 커피 할인", "편의점 적립"];
        let predefined = default_predefined_phrases();
        let a = VocabIndex::build(texts, &predefined, &ContentWordTokenizer);
        let b = VocabIndex::build(texts, &predefined, &ContentWordTokenizer);
        assert_eq!(a.terms(), b.terms());
    }

    #[tokio::test]
    async fn test_store_round_trip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = VocabStore::new(dir.path());
        let mut vocab = VocabIndex::build(
            ["zebra apple mango"],
            &phrases(&["banana"]),
            &WhitespaceTokenizer,
        );
        vocab.compute_idf(["zebra apple mango"], &WhitespaceTokenizer);

        let path = store.save("deep_dream", &vocab).await.unwrap();
        assert_eq!(path, dir.path().join("deep_dream").join("vocab.json"));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["total_tokens"], 4);
        assert_eq!(raw["predefined_words"][0], "banana");

        let loaded = store.load("deep_dream").await.unwrap();
        assert_eq!(loaded.terms(), &["zebra", "apple", "mango", "banana"]);
        assert_eq!(loaded.predefined_phrases(), vocab.predefined_phrases());
        assert!((loaded.idf("banana") - vocab.idf("banana")).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_or_malformed_vocab_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = VocabStore::new(dir.path());
        assert!(store.load("absent").await.is_none());

        std::fs::create_dir_all(dir.path().join("broken")).unwrap();
        std::fs::write(store.path_for("broken"), "{oops").unwrap();
        assert!(store.load("broken").await.is_none());
    }
}
