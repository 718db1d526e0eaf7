use index::SearchHit;
use ingest::keys;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const UNKNOWN_ENTITY: &str = "Unknown";

/// Metadata keys carrying the owning entity's name, most specific first.
const ENTITY_NAME_KEYS: [&str; 3] = [keys::ENTITY_NAME, "card_name", "product_name"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityScore {
    pub entity_name: String,
    pub score: u32,
}

pub fn resolve_entity_name(metadata: &Map<String, Value>) -> String {
    ENTITY_NAME_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_ENTITY)
        .to_string()
}

/// Occurrence count per entity, in order of first appearance.
pub fn calculate_scores(hits: &[SearchHit]) -> Vec<EntityScore> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut scores: Vec<EntityScore> = Vec::new();

    for hit in hits {
        let name = resolve_entity_name(&hit.metadata);
        match position.get(&name) {
            Some(&i) => scores[i].score += 1,
            None => {
                position.insert(name.clone(), scores.len());
                scores.push(EntityScore {
                    entity_name: name,
                    score: 1,
                });
            }
        }
    }
    scores
}

/// Score descending, then name ascending. Duplicate names are merged by summing.
pub fn rank(scores: Vec<EntityScore>) -> Vec<EntityScore> {
    let mut merged: HashMap<String, u32> = HashMap::new();
    for entry in scores {
        *merged.entry(entry.entity_name).or_insert(0) += entry.score;
    }

    let mut ranked: Vec<EntityScore> = merged
        .into_iter()
        .map(|(entity_name, score)| EntityScore { entity_name, score })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.entity_name.cmp(&b.entity_name))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(entity: Option<&str>) -> SearchHit {
        let metadata = match entity {
            Some(name) => json!({ "entity_name": name }),
            None => json!({}),
        };
        SearchHit {
            id: "id".to_string(),
            content: "content".to_string(),
            metadata: metadata.as_object().unwrap().clone(),
            distance: 0.1,
        }
    }

    fn score(name: &str, score: u32) -> EntityScore {
        EntityScore {
            entity_name: name.to_string(),
            score,
        }
    }

    #[test]
    fn test_calculate_scores_counts_occurrences() {
        let hits: Vec<SearchHit> = ["X", "X", "Y", "X", "Y", "Z"]
            .into_iter()
            .map(|name| hit(Some(name)))
            .collect();
        assert_eq!(
            calculate_scores(&hits),
            vec![score("X", 3), score("Y", 2), score("Z", 1)]
        );
    }

    #[test]
    fn test_missing_names_count_as_unknown() {
        let hits = vec![hit(None), hit(Some("  ")), hit(Some("A"))];
        let scores = calculate_scores(&hits);
        assert_eq!(scores, vec![score(UNKNOWN_ENTITY, 2), score("A", 1)]);
        assert_eq!(scores.iter().map(|s| s.score).sum::<u32>(), 3);
    }

    #[test]
    fn test_legacy_card_name_key() {
        let metadata = json!({ "card_name": "신한카드 Mr.Life" });
        assert_eq!(
            resolve_entity_name(metadata.as_object().unwrap()),
            "신한카드 Mr.Life"
        );
    }

    #[test]
    fn test_rank_orders_by_score_then_name() {
        let ranked = rank(vec![score("A", 3), score("B", 3), score("C", 5)]);
        assert_eq!(ranked, vec![score("C", 5), score("A", 3), score("B", 3)]);
    }

    #[test]
    fn test_rank_merges_duplicates() {
        let ranked = rank(vec![score("A", 1), score("B", 3), score("A", 4)]);
        assert_eq!(ranked, vec![score("A", 5), score("B", 3)]);
    }
}
