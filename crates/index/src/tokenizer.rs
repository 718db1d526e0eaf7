//! Tokenizers shared by vocabulary construction and sparse scoring.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    #[default]
    ContentWords,
    Whitespace,
}

impl TokenizerKind {
    pub fn build(self) -> Arc<dyn Tokenizer> {
        match self {
            TokenizerKind::ContentWords => Arc::new(ContentWordTokenizer),
            TokenizerKind::Whitespace => Arc::new(WhitespaceTokenizer),
        }
    }
}

/// Lowercased whitespace split, nothing removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(|t| t.to_lowercase()).collect()
    }
}

/// Keeps content words: Unicode word segmentation, lowercasing, function words and
/// numbers removed, trailing Korean particles stripped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentWordTokenizer;

const STOP_WORDS: &[&str] = &[
    // English
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "for", "from", "if", "in",
    "is", "it", "its", "of", "on", "or", "per", "than", "that", "the", "this", "to", "up",
    "was", "were", "with", "you", "your",
    // Korean
    "및", "등", "또는", "그리고", "그", "이", "저", "것", "수", "중", "더", "위해", "경우",
    "때", "있습니다", "없습니다", "합니다", "됩니다", "있는", "하는", "되는",
];

// Two-syllable particles are tried first.
const KOREAN_PARTICLES: &[&str] = &[
    "에서", "으로", "에게", "까지", "부터", "은", "는", "을", "를", "의", "와", "과", "도",
    "로", "에",
];

fn is_hangul(c: char) -> bool {
    ('\u{AC00}'..='\u{D7A3}').contains(&c)
}

fn strip_particle(token: &str) -> &str {
    if !token.chars().last().is_some_and(is_hangul) {
        return token;
    }
    for particle in KOREAN_PARTICLES {
        if let Some(stem) = token.strip_suffix(particle) {
            if stem.chars().count() >= 2 {
                return stem;
            }
        }
    }
    token
}

fn is_numeric_token(token: &str) -> bool {
    token
        .chars()
        .all(|c| c.is_numeric() || c == '.' || c == ',')
}

impl Tokenizer for ContentWordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .map(|word| word.to_lowercase())
            .filter_map(|word| {
                let token = strip_particle(&word);
                if is_numeric_token(token) || STOP_WORDS.contains(&token) {
                    return None;
                }
                if token.chars().count() == 1 && token.is_ascii() {
                    return None;
                }
                Some(token.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_words_drop_function_words_and_numbers() {
        let tokens = ContentWordTokenizer.tokenize("The Coffee discounts, 10% at cafés");
        assert_eq!(tokens, vec!["coffee", "discounts", "cafés"]);
    }

    #[test]
    fn test_korean_particles_are_stripped() {
        let tokens = ContentWordTokenizer.tokenize("스타벅스에서 커피를 10% 할인 받을 수 있습니다");
        assert!(tokens.contains(&"스타벅스".to_string()));
        assert!(tokens.contains(&"커피".to_string()));
        assert!(tokens.contains(&"할인".to_string()));
        assert!(!tokens.iter().any(|t| t == "10" || t == "수" || t == "있습니다"));
    }

    #[test]
    fn test_short_stems_keep_their_particle() {
        // Stripping "을" would leave a single syllable.
        assert_eq!(ContentWordTokenizer.tokenize("받을"), vec!["받을"]);
        assert_eq!(ContentWordTokenizer.tokenize("암"), vec!["암"]);
    }

    #[test]
    fn test_whitespace_tokenizer_lowercases() {
        assert_eq!(
            WhitespaceTokenizer.tokenize("Coffee  10%\tDiscount"),
            vec!["coffee", "10%", "discount"]
        );
    }

    #[test]
    fn test_kind_from_config_string() {
        let kind: TokenizerKind = serde_json::from_str("\"whitespace\"").unwrap();
        assert_eq!(kind, TokenizerKind::Whitespace);
        assert_eq!(kind.build().tokenize("A b"), vec!["a", "b"]);
    }
}
