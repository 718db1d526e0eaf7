use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::retry::{RetryConfig, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding endpoint rate limited the request")]
    RateLimited,
    #[error("embedding request failed ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("embedding transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode embedding response: {0}")]
    Decode(String),
    #[error("embedding endpoint returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
    #[error("invalid embedding configuration: {0}")]
    Config(String),
}

impl EmbeddingError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, EmbeddingError::RateLimited)
    }
}

/// Turns texts into dense vectors.
///
/// Blank texts are skipped: the output has one vector per non-blank input, in input
/// order. A batch either fully succeeds or fails as a whole.
pub trait Embedder: Send + Sync {
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send;

    fn embed_one(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbeddingError>> + Send {
        let texts = vec![text.to_string()];
        async move {
            let mut vectors = self.embed(&texts).await?;
            match vectors.len() {
                1 => Ok(vectors.remove(0)),
                actual => Err(EmbeddingError::CountMismatch {
                    expected: 1,
                    actual,
                }),
            }
        }
    }

    /// Vector size, measured with a throwaway input.
    fn dimension(&self) -> impl Future<Output = Result<usize, EmbeddingError>> + Send {
        async move { Ok(self.embed_one("dimension check").await?.len()) }
    }
}

/// Non-blank inputs, in order.
pub fn non_blank(texts: &[String]) -> Vec<&str> {
    texts
        .iter()
        .map(String::as_str)
        .filter(|t| !t.trim().is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    #[default]
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            batch_size: 32,
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Self::with_http_client(config, client)
    }

    pub fn with_http_client(
        config: EmbeddingConfig,
        client: reqwest::Client,
    ) -> Result<Self, EmbeddingError> {
        if config.model.trim().is_empty() {
            return Err(EmbeddingError::Config("missing embedding model name".to_string()));
        }
        if config.provider == EmbeddingProvider::OpenAi
            && config.api_key.as_deref().is_none_or(|k| k.trim().is_empty())
        {
            return Err(EmbeddingError::Config("missing embedding API key".to_string()));
        }

        let retry = RetryPolicy::from_config(&config.retry);
        Ok(Self {
            config,
            client,
            retry,
        })
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match self.config.provider {
            EmbeddingProvider::Ollama => format!("{}/api/embed", base),
            EmbeddingProvider::OpenAi => format!("{}/embeddings", base),
        }
    }

    /// One HTTP round trip for at most `batch_size` inputs.
    async fn send_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: inputs,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key.trim());
        }
        let response = builder.send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbeddingError::RateLimited);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let vectors = match self.config.provider {
            EmbeddingProvider::Ollama => {
                let parsed: OllamaResponse = response
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::Decode(e.to_string()))?;
                parsed.embeddings
            }
            EmbeddingProvider::OpenAi => {
                let mut parsed: OpenAiResponse = response
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::Decode(e.to_string()))?;
                parsed.data.sort_by_key(|entry| entry.index);
                parsed.data.into_iter().map(|entry| entry.embedding).collect()
            }
        };

        if vectors.len() != inputs.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: inputs.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

impl Embedder for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let inputs = non_blank(texts);
        let mut vectors = Vec::with_capacity(inputs.len());

        for batch in inputs.chunks(self.config.batch_size.max(1)) {
            let embedded = self
                .retry
                .retry_if("embed_batch", || self.send_batch(batch), EmbeddingError::is_rate_limited)
                .await?;
            vectors.extend(embedded);
        }

        debug!(
            inputs = texts.len(),
            embedded = vectors.len(),
            model = %self.config.model,
            "Embedded texts"
        );
        Ok(vectors)
    }
}
