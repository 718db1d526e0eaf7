use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::embeddings::Embedder;
use crate::vector::{EmbeddingRecord, MetadataFilter, SearchHit, VectorIndex};

const CHUNK_ID: &str = "chunk_id";
const CONTENT: &str = "content";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Points per upsert request.
    pub upsert_batch_size: usize,
    /// Points per scroll page in exact-match lookups.
    pub scroll_page_size: usize,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            collection: "product_disclosures".to_string(),
            api_key: None,
            timeout_secs: 30,
            upsert_batch_size: 64,
            scroll_page_size: 256,
        }
    }
}

/// Vector index backed by a Qdrant collection over its REST API.
pub struct QdrantIndex {
    config: QdrantConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

#[derive(Deserialize)]
struct CollectionInfo {
    result: CollectionResult,
}

#[derive(Deserialize)]
struct CollectionResult {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Deserialize)]
struct ScrollResult {
    points: Vec<ScoredPointLite>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
struct ScoredPointLite {
    id: Value,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

/// Stable point id for a chunk id.
pub fn point_id(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes())
}

fn filter_json(filter: &MetadataFilter) -> Value {
    let must: Vec<Value> = filter
        .conditions()
        .iter()
        .map(|(key, value)| json!({"key": key, "match": {"value": value}}))
        .collect();
    json!({ "must": must })
}

/// Split a stored payload back into a hit; the chunk id lives in the payload.
fn payload_hit(point_id: &Value, payload: Option<Map<String, Value>>, distance: f32) -> SearchHit {
    let mut metadata = payload.unwrap_or_default();
    let id = match metadata.remove(CHUNK_ID) {
        Some(Value::String(id)) => id,
        _ => match point_id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        },
    };
    let content = match metadata.remove(CONTENT) {
        Some(Value::String(content)) => content,
        _ => String::new(),
    };
    SearchHit {
        id,
        content,
        metadata,
        distance,
    }
}

impl QdrantIndex {
    pub fn new(config: QdrantConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Qdrant HTTP client")?;
        Ok(Self::with_http_client(config, client))
    }

    pub fn with_http_client(config: QdrantConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    fn collection_url(&self, path: &str) -> String {
        self.url(&format!("/collections/{}{}", self.config.collection, path))
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .context(format!("Failed to reach Qdrant ({})", what))?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Qdrant {} failed ({}): {}", what, status, error_text);
        }
        Ok(response)
    }

    /// Create the collection if it does not exist yet. Returns true when created.
    pub async fn init_collection(&self, dimension: usize) -> Result<bool> {
        let response = self
            .send(
                self.request(reqwest::Method::GET, self.url("/collections")),
                "list collections",
            )
            .await?;
        let info: CollectionInfo = response.json().await?;
        let exists = info
            .result
            .collections
            .iter()
            .any(|c| c.name == self.config.collection);

        if exists {
            info!(collection = %self.config.collection, "Collection already exists");
            return Ok(false);
        }

        let create_req = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine".to_string(),
            },
        };
        self.send(
            self.request(reqwest::Method::PUT, self.collection_url(""))
                .json(&create_req),
            "create collection",
        )
        .await?;

        info!(collection = %self.config.collection, dimension, "Collection created");
        Ok(true)
    }

    /// Like `init_collection`, with the dimension measured on the embedder.
    pub async fn ensure_collection<E: Embedder>(&self, embedder: &E) -> Result<bool> {
        let dimension = embedder
            .dimension()
            .await
            .context("Failed to measure embedding dimension")?;
        self.init_collection(dimension).await
    }
}

impl VectorIndex for QdrantIndex {
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        let mut points = Vec::with_capacity(records.len());
        for record in records {
            record.chunk.validate()?;
            anyhow::ensure!(
                !record.vector.is_empty(),
                "Chunk {} has an empty vector",
                record.chunk.id
            );

            let mut payload = record.chunk.index_metadata();
            payload.insert(CHUNK_ID.to_string(), Value::String(record.chunk.id.clone()));
            payload.insert(CONTENT.to_string(), Value::String(record.chunk.content));
            points.push(Point {
                id: point_id(&record.chunk.id).to_string(),
                vector: record.vector,
                payload,
            });
        }

        let written = points.len();
        let batch_size = self.config.upsert_batch_size.max(1);
        while !points.is_empty() {
            let rest = points.split_off(batch_size.min(points.len()));
            let batch = std::mem::replace(&mut points, rest);
            self.send(
                self.request(reqwest::Method::PUT, self.collection_url("/points?wait=true"))
                    .json(&UpsertPoints { points: batch }),
                "upsert points",
            )
            .await?;
        }

        Ok(written)
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let mut body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter_json(filter);
        }

        let response = self
            .send(
                self.request(reqwest::Method::POST, self.collection_url("/points/search"))
                    .json(&body),
                "search",
            )
            .await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Qdrant search response")?;

        let mut hits: Vec<SearchHit> = parsed
            .result
            .into_iter()
            .map(|point| payload_hit(&point.id, point.payload, (1.0 - point.score).max(0.0)))
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(hits)
    }

    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "limit": self.config.scroll_page_size.max(1),
                "with_payload": true,
                "with_vector": false,
            });
            if !filter.is_empty() {
                body["filter"] = filter_json(filter);
            }
            if let Some(offset) = &offset {
                body["offset"] = offset.clone();
            }

            let response = self
                .send(
                    self.request(reqwest::Method::POST, self.collection_url("/points/scroll"))
                        .json(&body),
                    "scroll",
                )
                .await?;
            let page: ScrollResponse = response
                .json()
                .await
                .context("Failed to parse Qdrant scroll response")?;

            hits.extend(
                page.result
                    .points
                    .into_iter()
                    .map(|point| payload_hit(&point.id, point.payload, 0.0)),
            );

            match page.result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .send(
                self.request(reqwest::Method::POST, self.collection_url("/points/count"))
                    .json(&json!({"exact": true})),
                "count",
            )
            .await?;
        let parsed: CountResponse = response.json().await?;
        Ok(parsed.result.count)
    }
}
