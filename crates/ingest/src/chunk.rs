use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata keys shared by the chunker, the vector index payload and the retriever.
pub mod keys {
    pub const ENTITY_NAME: &str = "entity_name";
    pub const ENTITY_GROUP: &str = "entity_group";
    pub const CHUNK_TYPE: &str = "chunk_type";
    pub const CATEGORY: &str = "category";
    pub const SOURCE_FILE: &str = "source_file";
    pub const MIN_PERFORMANCE: &str = "min_performance";
    pub const ANNUAL_FEE: &str = "annual_fee";
    pub const MAJOR_CATEGORIES: &str = "major_categories";
    pub const EVALUATION: &str = "evaluation";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Overview,
    Benefit,
    Fallback,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Overview => "overview",
            ChunkType::Benefit => "benefit",
            ChunkType::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ChunkError {
    #[error("chunk id is empty (entity: {entity})")]
    EmptyId { entity: String },
    #[error("chunk {id} has no content")]
    EmptyContent { id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub entity_name: String,
    pub entity_group: String,
    pub chunk_type: ChunkType,
    pub category: Option<String>,
    pub content: String,
    #[serde(default)]
    pub numeric_attributes: BTreeMap<String, f64>,
    #[serde(default)]
    pub tag_attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Chunk {
    /// Build the `{slug}-{type}-{ordinal:02}` id used for every chunk.
    pub fn make_id(slug: &str, chunk_type: ChunkType, ordinal: usize) -> String {
        format!("{}-{}-{:02}", slug, chunk_type, ordinal)
    }

    /// Check the invariants every persisted or embedded chunk must hold.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.id.trim().is_empty() {
            return Err(ChunkError::EmptyId {
                entity: self.entity_name.clone(),
            });
        }
        if self.content.trim().is_empty() {
            return Err(ChunkError::EmptyContent {
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Flat metadata map stored next to the vector.
    pub fn index_metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        for (key, value) in &self.metadata {
            if !value.is_null() {
                metadata.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &self.tag_attributes {
            metadata.insert(key.clone(), Value::String(value.clone()));
        }
        for (key, value) in &self.numeric_attributes {
            metadata.insert(key.clone(), number_value(*value));
        }

        // Lookups by entity name match on the trimmed form.
        metadata.insert(
            keys::ENTITY_NAME.to_string(),
            Value::String(self.entity_name.trim().to_string()),
        );
        metadata.insert(
            keys::ENTITY_GROUP.to_string(),
            Value::String(self.entity_group.trim().to_string()),
        );
        metadata.insert(
            keys::CHUNK_TYPE.to_string(),
            Value::String(self.chunk_type.as_str().to_string()),
        );
        if let Some(category) = &self.category {
            metadata.insert(keys::CATEGORY.to_string(), Value::String(category.clone()));
        }
        metadata
    }

    /// Rough token estimate, same heuristic the windowing budget is expressed in.
    pub fn estimated_tokens(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Whole numbers are stored as integers so the index payload keeps `300000`, not `300000.0`.
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Chunk {
        Chunk {
            id: Chunk::make_id("deep-dream", ChunkType::Benefit, 3),
            entity_name: "Deep Dream".to_string(),
            entity_group: "Shinhan".to_string(),
            chunk_type: ChunkType::Benefit,
            category: Some("Coffee".to_string()),
            content: "Coffee: 10% discount at Starbucks".to_string(),
            numeric_attributes: BTreeMap::from([("min_performance".to_string(), 300000.0)]),
            tag_attributes: BTreeMap::from([(
                "major_categories".to_string(),
                "Coffee, Shopping".to_string(),
            )]),
            metadata: BTreeMap::from([("source_url".to_string(), Value::from("https://x"))]),
        }
    }

    #[test]
    fn test_make_id_pads_ordinal() {
        assert_eq!(Chunk::make_id("card", ChunkType::Fallback, 7), "card-fallback-07");
        assert_eq!(Chunk::make_id("card", ChunkType::Benefit, 112), "card-benefit-112");
    }

    #[test]
    fn test_validate_rejects_blank_content() {
        let mut chunk = sample();
        chunk.content = "   ".to_string();
        assert_eq!(
            chunk.validate(),
            Err(ChunkError::EmptyContent { id: chunk.id.clone() })
        );

        chunk.id = String::new();
        assert!(matches!(chunk.validate(), Err(ChunkError::EmptyId { .. })));
    }

    #[test]
    fn test_index_metadata_flattens_attributes() {
        let metadata = sample().index_metadata();
        assert_eq!(metadata["entity_name"], "Deep Dream");
        assert_eq!(metadata["chunk_type"], "benefit");
        assert_eq!(metadata["category"], "Coffee");
        assert_eq!(metadata["min_performance"], Value::from(300000));
        assert_eq!(metadata["major_categories"], "Coffee, Shopping");
        assert_eq!(metadata["source_url"], "https://x");
    }

    #[test]
    fn test_index_metadata_trims_entity_name() {
        let mut chunk = sample();
        chunk.entity_name = "  Deep Dream \n".to_string();
        assert_eq!(chunk.index_metadata()["entity_name"], "Deep Dream");
    }

    #[test]
    fn test_serde_uses_lowercase_chunk_type() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"chunk_type\":\"benefit\""));
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }
}
