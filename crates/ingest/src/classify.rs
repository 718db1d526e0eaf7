//! Chunk classification: benefit markers, category labels and slugs.

use regex::Regex;
use std::sync::LazyLock;

use crate::chunk::ChunkType;

/// A versioned set of markers that flag a chunk as describing a benefit.
#[derive(Debug, Clone, Copy)]
pub struct KeywordTable {
    pub version: u32,
    pub benefit_markers: &'static [&'static str],
}

pub const BENEFIT_KEYWORDS_V1: KeywordTable = KeywordTable {
    version: 1,
    benefit_markers: &[
        "혜택", "할인", "적립", "우대", "%", "discount", "cashback", "reward", "benefit",
    ],
};

static CATEGORY_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z가-힣&/ ]{2,40})[:\-]").expect("category label pattern")
});

static SLUG_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9a-zA-Z가-힣]+").expect("slug pattern"));

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    table: KeywordTable,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(BENEFIT_KEYWORDS_V1)
    }
}

impl Classifier {
    pub fn new(table: KeywordTable) -> Self {
        Self { table }
    }

    pub fn table_version(&self) -> u32 {
        self.table.version
    }

    pub fn is_benefit(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.table
            .benefit_markers
            .iter()
            .any(|marker| lower.contains(&marker.to_lowercase()))
    }

    /// Type of a non-overview chunk.
    pub fn chunk_type(&self, text: &str) -> ChunkType {
        if self.is_benefit(text) {
            ChunkType::Benefit
        } else {
            ChunkType::Fallback
        }
    }
}

/// Best-effort category from a leading `Label:` or `Label-` header.
pub fn infer_category(text: &str) -> Option<String> {
    CATEGORY_LABEL
        .captures(text.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|label| !label.is_empty())
}

pub fn slugify(value: &str) -> String {
    let slug = SLUG_SEPARATORS.replace_all(value, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "chunk".to_string()
    } else {
        slug.to_string()
    }
}
