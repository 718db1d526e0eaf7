//! Structured post-filters applied to dense search candidates.

use index::SearchHit;
use ingest::{keys, parse_amount};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Outcome of normalizing a `major_categories` value.
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryParse {
    Ok(BTreeSet<String>),
    Malformed(String),
}

impl CategoryParse {
    /// Categories usable for filtering; malformed values count as none.
    pub fn categories(&self) -> Option<&BTreeSet<String>> {
        match self {
            CategoryParse::Ok(set) if !set.is_empty() => Some(set),
            _ => None,
        }
    }
}

fn clean(item: &str) -> String {
    item.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '[' || c == ']')
        .trim()
        .to_lowercase()
}

fn collect_items(items: &[Value]) -> BTreeSet<String> {
    items
        .iter()
        .map(|item| match item {
            Value::String(text) => clean(text),
            other => clean(&other.to_string()),
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// Normalize a list, JSON array literal, Python-style list literal or comma separated
/// string into a lowercase category set.
pub fn normalize_categories(value: Option<&Value>) -> CategoryParse {
    let raw = match value {
        None | Some(Value::Null) => return CategoryParse::Ok(BTreeSet::new()),
        Some(Value::Array(items)) => return CategoryParse::Ok(collect_items(items)),
        Some(Value::String(raw)) => raw.trim(),
        Some(other) => return CategoryParse::Malformed(other.to_string()),
    };

    if raw.is_empty() || raw.eq_ignore_ascii_case("n/a") {
        return CategoryParse::Ok(BTreeSet::new());
    }

    if raw.starts_with('[') && raw.ends_with(']') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
            return CategoryParse::Ok(collect_items(&items));
        }
        // Python list literal: ['Coffee', 'Shopping']
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&raw.replace('\'', "\"")) {
            return CategoryParse::Ok(collect_items(&items));
        }
    }

    let set: BTreeSet<String> = raw
        .split(',')
        .map(clean)
        .filter(|item| !item.is_empty())
        .collect();
    if set.is_empty() {
        CategoryParse::Malformed(raw.to_string())
    } else {
        CategoryParse::Ok(set)
    }
}

/// Budget and category constraints for one search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitFilter {
    budget_ceiling: Option<i64>,
    categories: BTreeSet<String>,
}

impl HitFilter {
    pub fn new(budget_ceiling: Option<i64>, categories: &[String]) -> Self {
        Self {
            budget_ceiling,
            categories: categories
                .iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    /// Unparseable `min_performance` means no constraint.
    pub fn within_budget(&self, metadata: &Map<String, Value>) -> bool {
        let Some(ceiling) = self.budget_ceiling else {
            return true;
        };
        match metadata.get(keys::MIN_PERFORMANCE).and_then(parse_amount) {
            Some(required) => required <= ceiling,
            None => true,
        }
    }

    /// Retained unless both sides are non-empty and share nothing.
    pub fn matches_categories(&self, metadata: &Map<String, Value>) -> bool {
        if self.categories.is_empty() {
            return true;
        }
        match normalize_categories(metadata.get(keys::MAJOR_CATEGORIES)).categories() {
            Some(found) => !found.is_disjoint(&self.categories),
            None => true,
        }
    }

    pub fn accepts(&self, hit: &SearchHit) -> bool {
        self.within_budget(&hit.metadata) && self.matches_categories(&hit.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(items: &[&str]) -> CategoryParse {
        CategoryParse::Ok(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_normalize_every_encoding() {
        assert_eq!(normalize_categories(Some(&json!(["Coffee", " Shopping "]))), set(&["coffee", "shopping"]));
        assert_eq!(normalize_categories(Some(&json!("[\"Coffee\", \"Travel\"]"))), set(&["coffee", "travel"]));
        assert_eq!(normalize_categories(Some(&json!("['Coffee', 'Travel']"))), set(&["coffee", "travel"]));
        assert_eq!(normalize_categories(Some(&json!("General,Shopping,Coffee"))), set(&["coffee", "general", "shopping"]));
        assert_eq!(normalize_categories(Some(&json!("[Coffee, 'Movie\"]"))), set(&["coffee", "movie"]));
    }

    #[test]
    fn test_normalize_empty_and_malformed() {
        assert_eq!(normalize_categories(None), set(&[]));
        assert_eq!(normalize_categories(Some(&json!(null))), set(&[]));
        assert_eq!(normalize_categories(Some(&json!("N/A"))), set(&[]));
        assert_eq!(normalize_categories(Some(&json!("  "))), set(&[]));
        assert_eq!(
            normalize_categories(Some(&json!(42))),
            CategoryParse::Malformed("42".to_string())
        );
        assert_eq!(
            normalize_categories(Some(&json!(", ,"))),
            CategoryParse::Malformed(", ,".to_string())
        );
    }

    #[test]
    fn test_budget_filter() {
        let filter = HitFilter::new(Some(500000), &[]);
        let meta = |v: Value| json!({ "min_performance": v }).as_object().unwrap().clone();

        assert!(filter.within_budget(&meta(json!(300000))));
        assert!(filter.within_budget(&meta(json!(500000))));
        assert!(!filter.within_budget(&meta(json!(600000))));
        assert!(!filter.within_budget(&meta(json!("600,000원"))));
        assert!(filter.within_budget(&meta(json!("전월 실적 없음"))));
        assert!(filter.within_budget(&Map::new()));
        assert!(HitFilter::new(None, &[]).within_budget(&meta(json!(900000))));
    }

    #[test]
    fn test_fractional_requirement_does_not_pass_lower_ceiling() {
        let meta = |v: Value| json!({ "min_performance": v }).as_object().unwrap().clone();

        assert!(!HitFilter::new(Some(299999), &[]).within_budget(&meta(json!(299999.9))));
        assert!(HitFilter::new(Some(300000), &[]).within_budget(&meta(json!(299999.9))));
    }

    #[test]
    fn test_category_filter() {
        let filter = HitFilter::new(None, &["Coffee".to_string(), "Cultural".to_string()]);
        let meta = |v: Value| json!({ "major_categories": v }).as_object().unwrap().clone();

        assert!(filter.matches_categories(&meta(json!("General,Coffee"))));
        assert!(!filter.matches_categories(&meta(json!("Shopping,Travel"))));
        assert!(filter.matches_categories(&meta(json!(""))));
        assert!(filter.matches_categories(&meta(json!(17))));
        assert!(filter.matches_categories(&Map::new()));
        assert!(HitFilter::new(None, &[]).matches_categories(&meta(json!("Shopping"))));
    }
}
