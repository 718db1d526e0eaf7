use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// Extracted disclosure text plus whatever header fields the extraction stage found.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceDocument {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    #[serde(default, alias = "card_name", alias = "product_name")]
    pub entity_name: Option<String>,
    #[serde(default, alias = "company", alias = "card_company", alias = "insurer")]
    pub entity_group: Option<String>,
    #[serde(default, alias = "pdf_title")]
    pub title: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub local_path: Option<String>,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub page_count: Option<u32>,
    /// Remaining attributes (`annual_fee`, `min_performance`, `major_categories`, ...).
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
    /// File stem the document was read from; names its vocabulary artifacts.
    #[serde(skip)]
    pub stem: String,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl SourceDocument {
    pub fn from_text(stem: &str, text: &str) -> Self {
        Self {
            text: text.to_string(),
            stem: stem.to_string(),
            ..Self::default()
        }
    }
}

/// One row of the sibling index, keyed by column name.
pub type SiblingMetadata = HashMap<String, String>;

/// Entity name -> sibling metadata row, loaded from the crawler's CSV index.
#[derive(Debug, Clone, Default)]
pub struct SiblingIndex {
    rows: HashMap<String, SiblingMetadata>,
}

impl SiblingIndex {
    const KEY_COLUMNS: [&'static str; 3] = ["entity_name", "card_name", "product_name"];

    pub fn from_rows(rows: impl IntoIterator<Item = SiblingMetadata>) -> Self {
        let mut index = HashMap::new();
        for row in rows {
            let key = Self::KEY_COLUMNS
                .iter()
                .find_map(|column| row.get(*column))
                .map(|name| name.trim().to_string());
            if let Some(name) = key.filter(|name| !name.is_empty()) {
                index.insert(name, row);
            }
        }
        Self { rows: index }
    }

    /// Missing file is an empty index; a malformed one is an error.
    pub fn load_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut reader = csv::Reader::from_path(path)
            .context(format!("Failed to open sibling index: {:?}", path))?;
        let mut rows = Vec::new();
        for record in reader.deserialize::<SiblingMetadata>() {
            rows.push(record.context(format!("Malformed row in {:?}", path))?);
        }
        Ok(Self::from_rows(rows))
    }

    pub fn get(&self, entity_name: &str) -> Option<&SiblingMetadata> {
        self.rows.get(entity_name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct FileReader;

impl FileReader {
    pub async fn read_document(path: &Path) -> Result<SourceDocument> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        match extension {
            "json" => {
                let content = fs::read_to_string(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                let mut document: SourceDocument = serde_json::from_str(&content)
                    .context(format!("Malformed source document: {:?}", path))?;
                document.stem = stem;
                Ok(document)
            }
            "txt" | "md" => {
                let content = fs::read_to_string(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                Ok(SourceDocument::from_text(&stem, &content))
            }
            _ => anyhow::bail!("Unsupported file format: {}", extension),
        }
    }

    /// Every supported document under `dir`, recursively, in path order.
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.context(format!("Failed to walk {:?}", dir))?;
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(ext) = path.extension() {
                if ext == "json" || ext == "txt" || ext == "md" {
                    files.push(path.to_path_buf());
                }
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_text_is_empty() {
        let document: SourceDocument =
            serde_json::from_str(r#"{"text": null, "entity_name": "Deep Dream"}"#).unwrap();
        assert_eq!(document.text, "");
        assert_eq!(document.entity_name.as_deref(), Some("Deep Dream"));

        let document: SourceDocument = serde_json::from_str(r#"{"card_name": "X"}"#).unwrap();
        assert_eq!(document.text, "");
    }

    #[tokio::test]
    async fn test_read_json_document_with_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep_dream.json");
        std::fs::write(
            &path,
            r#"{"text": "body", "card_name": "Deep Dream", "company": "Shinhan",
                "pdf_title": "Terms", "min_performance": "300,000원", "annual_fee": 15000}"#,
        )
        .unwrap();

        let document = FileReader::read_document(&path).await.unwrap();
        assert_eq!(document.stem, "deep_dream");
        assert_eq!(document.entity_name.as_deref(), Some("Deep Dream"));
        assert_eq!(document.entity_group.as_deref(), Some("Shinhan"));
        assert_eq!(document.title.as_deref(), Some("Terms"));
        assert_eq!(document.attributes["min_performance"], "300,000원");
        assert_eq!(document.attributes["annual_fee"], 15000);
    }

    #[tokio::test]
    async fn test_malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(FileReader::read_document(&path).await.is_err());
    }

    #[test]
    fn test_discover_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("kb")).unwrap();
        std::fs::write(dir.path().join("kb/b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.pdf"), "").unwrap();

        let files = FileReader::discover(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "kb/b.json"]);
    }

    #[test]
    fn test_sibling_index_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.csv");
        std::fs::write(
            &path,
            "card_name,company,source_url,min_performance\nDeep Dream,Shinhan,https://s,300000\n",
        )
        .unwrap();

        let index = SiblingIndex::load_csv(&path).unwrap();
        assert_eq!(index.len(), 1);
        let row = index.get("Deep Dream").unwrap();
        assert_eq!(row["company"], "Shinhan");
        assert!(SiblingIndex::load_csv(&dir.path().join("missing.csv")).unwrap().is_empty());
    }
}
