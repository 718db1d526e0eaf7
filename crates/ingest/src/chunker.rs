use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::attributes::parse_amount;
use crate::chunk::{keys, Chunk, ChunkType};
use crate::classify::{infer_category, slugify, Classifier};
use crate::reader::{SiblingMetadata, SourceDocument};

const NUMERIC_ATTRIBUTES: [&str; 2] = [keys::ANNUAL_FEE, keys::MIN_PERFORMANCE];
const TAG_ATTRIBUTES: [&str; 4] = [
    keys::MAJOR_CATEGORIES,
    "benefits_summary",
    "benefit_summary",
    "conditions",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Window size in whitespace tokens for the fallback splitter.
    pub target_chunk_tokens: usize,
    pub overlap_tokens: usize,
    /// Pack newline-delimited sections instead of windowing the whole body.
    pub benefit_mode: bool,
    /// Character ceiling for a packed section chunk.
    pub max_section_chars: usize,
    /// Window used to re-split a single section longer than `max_section_chars`.
    pub section_window_tokens: usize,
    pub section_window_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chunk_tokens: 500,
            overlap_tokens: 60,
            benefit_mode: true,
            max_section_chars: 1000,
            section_window_tokens: 150,
            section_window_overlap: 20,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
    classifier: Classifier,
}

/// Output of the packing phase, before ids are assigned.
#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Packed(String),
    Oversized(&'a str),
}

/// Identity and shared metadata resolved once per document.
struct DocumentHeader {
    entity_name: String,
    entity_group: String,
    slug: String,
    numeric: BTreeMap<String, f64>,
    tags: BTreeMap<String, String>,
    metadata: BTreeMap<String, Value>,
    overview_lines: Vec<String>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self::with_classifier(config, Classifier::default())
    }

    pub fn with_classifier(config: ChunkerConfig, classifier: Classifier) -> Self {
        Self { config, classifier }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split one document into an overview chunk followed by body chunks.
    pub fn generate_chunks(
        &self,
        document: &SourceDocument,
        sibling: Option<&SiblingMetadata>,
    ) -> Vec<Chunk> {
        if document.text.trim().is_empty() {
            return Vec::new();
        }

        let header = DocumentHeader::resolve(document, sibling);
        let mut chunks = vec![self.overview_chunk(&header)];

        let mut bodies = if self.config.benefit_mode {
            self.benefit_bodies(&document.text)
        } else {
            Vec::new()
        };
        if bodies.is_empty() {
            bodies = window_split(
                &document.text,
                self.config.target_chunk_tokens,
                self.config.overlap_tokens,
            );
        }

        for (ordinal, content) in bodies.into_iter().enumerate() {
            chunks.push(self.body_chunk(&header, content, ordinal + 1));
        }

        chunks
    }

    fn overview_chunk(&self, header: &DocumentHeader) -> Chunk {
        let mut content = format!(
            "{} ({}) disclosure overview",
            header.entity_name, header.entity_group
        );
        for line in &header.overview_lines {
            content.push('\n');
            content.push_str(line);
        }

        Chunk {
            id: Chunk::make_id(&header.slug, ChunkType::Overview, 1),
            entity_name: header.entity_name.clone(),
            entity_group: header.entity_group.clone(),
            chunk_type: ChunkType::Overview,
            category: None,
            content,
            numeric_attributes: header.numeric.clone(),
            tag_attributes: header.tags.clone(),
            metadata: header.metadata.clone(),
        }
    }

    fn body_chunk(&self, header: &DocumentHeader, content: String, ordinal: usize) -> Chunk {
        let chunk_type = self.classifier.chunk_type(&content);
        Chunk {
            id: Chunk::make_id(&header.slug, chunk_type, ordinal),
            entity_name: header.entity_name.clone(),
            entity_group: header.entity_group.clone(),
            chunk_type,
            category: infer_category(&content),
            content,
            numeric_attributes: header.numeric.clone(),
            tag_attributes: header.tags.clone(),
            metadata: header.metadata.clone(),
        }
    }

    /// Pack sections, then window-split the oversized ones, keeping document order.
    fn benefit_bodies(&self, text: &str) -> Vec<String> {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        let sections: Vec<&str> = normalized
            .split('\n')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut bodies = Vec::new();
        for segment in plan_segments(&sections, self.config.max_section_chars) {
            match segment {
                Segment::Packed(content) => bodies.push(content),
                Segment::Oversized(section) => bodies.extend(window_split(
                    section,
                    self.config.section_window_tokens,
                    self.config.section_window_overlap,
                )),
            }
        }
        bodies
    }
}

/// Greedy packing of sections into `max_chars`-bounded buffers joined by newlines.
/// Sections that cannot fit on their own are emitted as `Oversized` in place.
fn plan_segments<'a>(sections: &[&'a str], max_chars: usize) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut buffer_chars = 0;

    fn flush(buffer: &mut Vec<&str>, segments: &mut Vec<Segment<'_>>) {
        if !buffer.is_empty() {
            segments.push(Segment::Packed(buffer.join("\n")));
            buffer.clear();
        }
    }

    for &section in sections {
        let len = section.chars().count();
        if len > max_chars {
            flush(&mut buffer, &mut segments);
            buffer_chars = 0;
            segments.push(Segment::Oversized(section));
            continue;
        }

        let joined = if buffer.is_empty() { len } else { buffer_chars + 1 + len };
        if joined > max_chars {
            flush(&mut buffer, &mut segments);
            buffer_chars = len;
        } else {
            buffer_chars = joined;
        }
        buffer.push(section);
    }
    flush(&mut buffer, &mut segments);

    segments
}

/// Token ranges of the sliding windows over `len` tokens.
pub fn window_bounds(len: usize, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let size = size.max(1);
    let mut bounds = Vec::new();
    let mut start = 0;
    while start < len {
        let end = len.min(start + size);
        bounds.push((start, end));
        if end == len {
            break;
        }
        // Always move forward, even when overlap >= size.
        start = end.saturating_sub(overlap).max(start + 1);
    }
    bounds
}

/// Fixed-size whitespace-token windows with `overlap` tokens of back-step.
pub fn window_split(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    window_bounds(tokens.len(), size, overlap)
        .into_iter()
        .map(|(start, end)| tokens[start..end].join(" "))
        .filter(|window| !window.trim().is_empty())
        .collect()
}

impl DocumentHeader {
    fn resolve(document: &SourceDocument, sibling: Option<&SiblingMetadata>) -> Self {
        let from_sibling = |keys: &[&str]| -> Option<String> {
            sibling.and_then(|row| {
                keys.iter()
                    .filter_map(|key| row.get(*key))
                    .map(|value| value.trim().to_string())
                    .find(|value| !value.is_empty())
            })
        };
        let non_empty = |value: &Option<String>| {
            value
                .as_ref()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let entity_name = non_empty(&document.entity_name)
            .or_else(|| from_sibling(&["entity_name", "card_name", "product_name"]))
            .or_else(|| {
                Some(document.stem.trim())
                    .filter(|stem| !stem.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "Unknown".to_string());
        let entity_group = non_empty(&document.entity_group)
            .or_else(|| from_sibling(&["entity_group", "company", "card_company", "insurer"]))
            .unwrap_or_else(|| "Unknown".to_string());
        let slug = slugify(&entity_name);

        let mut metadata = BTreeMap::new();
        let source_url = non_empty(&document.source_url).or_else(|| from_sibling(&["source_url"]));
        let local_pdf = non_empty(&document.local_path).or_else(|| from_sibling(&["local_path"]));
        let title = non_empty(&document.title);
        if let Some(size) = document.file_size_bytes {
            metadata.insert("file_size_bytes".to_string(), Value::from(size));
        }
        if let Some(pages) = document.page_count {
            metadata.insert("page_count".to_string(), Value::from(pages));
        }
        if let Some(url) = &source_url {
            metadata.insert("source_url".to_string(), Value::from(url.as_str()));
        }
        if let Some(path) = local_pdf {
            metadata.insert("local_pdf".to_string(), Value::from(path));
        }
        if let Some(title) = &title {
            metadata.insert("title".to_string(), Value::from(title.as_str()));
        }
        if !document.stem.is_empty() {
            metadata.insert(keys::SOURCE_FILE.to_string(), Value::from(document.stem.as_str()));
        }

        let attribute = |key: &str| -> Option<Value> {
            document
                .attributes
                .get(key)
                .filter(|value| !value.is_null())
                .cloned()
                .or_else(|| from_sibling(&[key]).map(Value::String))
        };

        let mut numeric = BTreeMap::new();
        let mut tags = BTreeMap::new();
        let mut displays = BTreeMap::new();
        for key in NUMERIC_ATTRIBUTES {
            let Some(value) = attribute(key) else { continue };
            displays.insert(key, display_value(&value));
            match parse_amount(&value) {
                Some(amount) => {
                    numeric.insert(key.to_string(), amount as f64);
                }
                None => {
                    tags.insert(key.to_string(), display_value(&value));
                }
            }
        }
        for key in TAG_ATTRIBUTES {
            if let Some(value) = attribute(key) {
                let text = display_value(&value);
                if !text.trim().is_empty() {
                    tags.insert(key.to_string(), text);
                }
            }
        }
        for (key, value) in &document.attributes {
            let known = NUMERIC_ATTRIBUTES.contains(&key.as_str())
                || TAG_ATTRIBUTES.contains(&key.as_str());
            let scalar = value.is_string() || value.is_number() || value.is_boolean();
            if !known && scalar && !metadata.contains_key(key) {
                metadata.insert(key.clone(), value.clone());
            }
        }

        let mut overview_lines = Vec::new();
        if let Some(fee) = displays.get(keys::ANNUAL_FEE) {
            overview_lines.push(format!("- Annual fee: {}", fee));
        }
        if let Some(spend) = displays.get(keys::MIN_PERFORMANCE) {
            overview_lines.push(format!("- Minimum performance: {}", spend));
        }
        if let Some(title) = &title {
            overview_lines.push(format!("- PDF title: {}", title));
        }
        overview_lines.push(format!(
            "- Source URL: {}",
            source_url.as_deref().unwrap_or("unknown")
        ));

        Self {
            entity_name,
            entity_group,
            slug,
            numeric,
            tags,
            metadata,
            overview_lines,
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
