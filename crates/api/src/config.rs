use anyhow::{Context, Result};
use index::{EmbeddingConfig, QdrantConfig};
use ingest::ChunkerConfig;
use query::{JudgeConfig, RetrievalConfig, DEFAULT_SHORTLIST};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_ENV: &str = "RECOMMENDER_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub chunker: ChunkerConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub backend: BackendKind,
    pub qdrant: QdrantConfig,
    /// `None` leaves multi-query results unjudged.
    pub judge: Option<JudgeConfig>,
    pub paths: PathsConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local index, rebuilt on every start.
    Memory,
    #[default]
    Qdrant,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "qdrant" => Ok(BackendKind::Qdrant),
            other => anyhow::bail!("Unknown vector backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    /// Product metadata CSV merged into document headers.
    pub sibling_csv: Option<PathBuf>,
    /// JSON list of phrases, e.g. `["카페", "주유"]`; replaces the built-in list.
    pub predefined_phrases: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sibling_csv: None,
            predefined_phrases: None,
        }
    }
}

impl PathsConfig {
    pub fn docs_dir(&self) -> PathBuf {
        self.data_dir.join("docs")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.data_dir.join("chunks")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    /// The configured phrase list, or `default` when no override file is set.
    pub fn load_predefined_phrases(&self, default: Vec<String>) -> Result<Vec<String>> {
        let Some(path) = &self.predefined_phrases else {
            return Ok(default);
        };
        let json = std::fs::read_to_string(path)
            .context(format!("Failed to read predefined phrases: {:?}", path))?;
        let phrases: Vec<String> = serde_json::from_str(&json)
            .context(format!("Failed to parse predefined phrases: {:?}", path))?;

        Ok(phrases
            .iter()
            .map(|phrase| phrase.trim())
            .filter(|phrase| !phrase.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Entities expanded by `/recommend` unless the request says otherwise.
    pub shortlist: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            shortlist: DEFAULT_SHORTLIST,
        }
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, raw, e))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("Invalid value for {}: {:?}", key, raw),
    }
}

impl AppConfig {
    /// Defaults, then the file named by `RECOMMENDER_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .context(format!("Failed to read config: {:?}", path))?;
        serde_json::from_str(&json).context(format!("Failed to parse config: {:?}", path))
    }

    /// Apply overrides from `lookup`; unset or blank variables are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CHUNK_TOKEN_SIZE") {
            self.chunker.target_chunk_tokens = parse("CHUNK_TOKEN_SIZE", &v)?;
        }
        if let Some(v) = get("CHUNK_OVERLAP") {
            self.chunker.overlap_tokens = parse("CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = get("ENABLE_BENEFIT_REGEX") {
            self.chunker.benefit_mode = parse_bool("ENABLE_BENEFIT_REGEX", &v)?;
        }
        if let Some(v) = get("EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Some(v) = get("EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = get("VECTOR_BACKEND") {
            self.backend = parse("VECTOR_BACKEND", &v)?;
        }
        if let Some(v) = get("QDRANT_URL") {
            self.qdrant.url = v;
        }
        if let Some(v) = get("QDRANT_COLLECTION") {
            self.qdrant.collection = v;
        }
        if let Some(v) = get("JUDGE_MODEL") {
            self.judge.get_or_insert_with(JudgeConfig::default).model = v;
        }
        if let Some(v) = get("DATA_DIR") {
            self.paths.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("BIND_ADDR") {
            self.server.bind_addr = v;
        }

        anyhow::ensure!(
            self.chunker.overlap_tokens < self.chunker.target_chunk_tokens,
            "CHUNK_OVERLAP ({}) must be smaller than CHUNK_TOKEN_SIZE ({})",
            self.chunker.overlap_tokens,
            self.chunker.target_chunk_tokens
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.chunker.target_chunk_tokens, 500);
        assert_eq!(config.chunker.overlap_tokens, 60);
        assert!(config.chunker.benefit_mode);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.retrieval.pre_filter_k, 50);
        assert_eq!(config.server.shortlist, 3);
        assert_eq!(config.paths.artifacts_dir(), PathBuf::from("data/artifacts"));
        assert!(config.judge.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("CHUNK_TOKEN_SIZE", "300"),
                ("CHUNK_OVERLAP", "30"),
                ("ENABLE_BENEFIT_REGEX", "false"),
                ("EMBEDDING_MODEL", "bge-m3"),
                ("VECTOR_BACKEND", "memory"),
                ("QDRANT_COLLECTION", "cards"),
                ("JUDGE_MODEL", "qwen2"),
                ("DATA_DIR", "/srv/data"),
                ("BIND_ADDR", " "),
            ]))
            .unwrap();

        assert_eq!(config.chunker.target_chunk_tokens, 300);
        assert_eq!(config.chunker.overlap_tokens, 30);
        assert!(!config.chunker.benefit_mode);
        assert_eq!(config.embedding.model, "bge-m3");
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.qdrant.collection, "cards");
        assert_eq!(config.judge.unwrap().model, "qwen2");
        assert_eq!(config.paths.chunks_dir(), PathBuf::from("/srv/data/chunks"));
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_invalid_env_values_are_errors() {
        assert!(AppConfig::default()
            .apply_env(env(&[("CHUNK_TOKEN_SIZE", "many")]))
            .is_err());
        assert!(AppConfig::default()
            .apply_env(env(&[("ENABLE_BENEFIT_REGEX", "maybe")]))
            .is_err());
        assert!(AppConfig::default()
            .apply_env(env(&[("CHUNK_TOKEN_SIZE", "50"), ("CHUNK_OVERLAP", "50")]))
            .is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"retrieval": {"top_k": 5}, "backend": "memory", "server": {"shortlist": 1}}"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.pre_filter_k, 50);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.server.shortlist, 1);
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_predefined_phrases_override_is_a_json_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phrases.json");
        std::fs::write(&path, r#"["카페", " 주유 ", "", "반려동물 보험"]"#).unwrap();

        let mut paths = PathsConfig::default();
        paths.predefined_phrases = Some(path);
        let phrases = paths.load_predefined_phrases(vec!["default".to_string()]).unwrap();
        assert_eq!(phrases, vec!["카페", "주유", "반려동물 보험"]);
    }

    #[test]
    fn test_predefined_phrases_without_override_use_default() {
        let phrases = PathsConfig::default()
            .load_predefined_phrases(vec!["default".to_string()])
            .unwrap();
        assert_eq!(phrases, vec!["default"]);
    }

    #[test]
    fn test_line_oriented_phrases_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phrases.txt");
        std::fs::write(&path, "카페\n주유\n").unwrap();

        let mut paths = PathsConfig::default();
        paths.predefined_phrases = Some(path.clone());
        assert!(paths.load_predefined_phrases(Vec::new()).is_err());

        paths.predefined_phrases = Some(dir.path().join("missing.json"));
        assert!(paths.load_predefined_phrases(Vec::new()).is_err());
    }
}
