pub mod embeddings;
pub mod memory_index;
pub mod qdrant_index;
pub mod retry;
pub mod tokenizer;
pub mod vector;
pub mod vocab;

pub use embeddings::{
    non_blank, Embedder, EmbeddingClient, EmbeddingConfig, EmbeddingError, EmbeddingProvider,
};
pub use memory_index::MemoryIndex;
pub use qdrant_index::{point_id, QdrantConfig, QdrantIndex};
pub use retry::{RetryConfig, RetryPolicy};
pub use tokenizer::{ContentWordTokenizer, Tokenizer, TokenizerKind, WhitespaceTokenizer};
pub use vector::{cosine_distance, EmbeddingRecord, MetadataFilter, SearchHit, VectorIndex};
pub use vocab::{default_predefined_phrases, VocabIndex, VocabStore, DEFAULT_PREDEFINED_PHRASES};

use anyhow::{Context, Result};
use ingest::{Chunk, ChunkStore, Chunker, SiblingIndex, SourceDocument};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Which stages of the offline pipeline to run.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Chunk, persist and build vocabularies; skip embedding.
    pub chunks_only: bool,
    /// Embed previously persisted chunks without re-chunking.
    pub embed_only: bool,
    /// Restrict the run to one entity name.
    pub entity: Option<String>,
    pub compute_idf: bool,
}

impl IndexOptions {
    fn wants(&self, entity_name: &str) -> bool {
        self.entity
            .as_deref()
            .is_none_or(|wanted| wanted.trim().eq_ignore_ascii_case(entity_name.trim()))
    }
}

#[derive(Debug, Default, Serialize)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks_written: usize,
    pub vocabularies_written: usize,
    pub chunks_embedded: usize,
    pub failures: Vec<String>,
}

/// Offline pipeline: chunk -> JSONL -> vocabulary -> embed -> upsert.
pub struct Indexer<E, V> {
    chunker: Chunker,
    chunk_store: ChunkStore,
    vocab_store: VocabStore,
    tokenizer: Arc<dyn Tokenizer>,
    predefined_phrases: Vec<String>,
    embedder: Arc<E>,
    index: Arc<V>,
}

impl<E: Embedder, V: VectorIndex> Indexer<E, V> {
    pub fn new(
        chunker: Chunker,
        chunk_store: ChunkStore,
        vocab_store: VocabStore,
        embedder: Arc<E>,
        index: Arc<V>,
    ) -> Self {
        Self {
            chunker,
            chunk_store,
            vocab_store,
            tokenizer: TokenizerKind::default().build(),
            predefined_phrases: default_predefined_phrases(),
            embedder,
            index,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_predefined_phrases(mut self, phrases: Vec<String>) -> Self {
        self.predefined_phrases = phrases;
        self
    }

    /// Run the pipeline over every supported document under `dir`.
    pub async fn index_directory(
        &self,
        dir: &Path,
        siblings: &SiblingIndex,
        options: &IndexOptions,
    ) -> Result<IndexReport> {
        if options.embed_only {
            return self.embed_persisted(options).await;
        }

        let files = ingest::FileReader::discover(dir)?;
        info!(dir = ?dir, files = files.len(), "Indexing directory");

        let mut report = IndexReport::default();
        for path in files {
            match ingest::FileReader::read_document(&path).await {
                Ok(document) => {
                    self.index_document(&document, siblings, options, &mut report)
                        .await
                }
                Err(e) => {
                    warn!(file = ?path, error = %e, "Skipping unreadable document");
                    report.failures.push(format!("{}: {:#}", path.display(), e));
                }
            }
        }

        info!(
            documents = report.documents,
            chunks = report.chunks_written,
            embedded = report.chunks_embedded,
            failures = report.failures.len(),
            "Indexing complete"
        );
        Ok(report)
    }

    /// Chunk one document and push it through the remaining stages.
    /// Failures are recorded on the report; other documents are unaffected.
    pub async fn index_document(
        &self,
        document: &SourceDocument,
        siblings: &SiblingIndex,
        options: &IndexOptions,
        report: &mut IndexReport,
    ) {
        let sibling = document
            .entity_name
            .as_deref()
            .or(Some(document.stem.as_str()))
            .and_then(|name| siblings.get(name));
        let chunks = self.chunker.generate_chunks(document, sibling);

        let Some(first) = chunks.first() else {
            warn!(stem = %document.stem, "Document produced no chunks");
            return;
        };
        if !options.wants(&first.entity_name) {
            return;
        }
        let entity = first.entity_name.clone();
        report.documents += 1;

        if let Err(e) = self.chunk_store.write(&chunks).await {
            error!(entity = %entity, error = %e, "Failed to persist chunks");
            report.failures.push(format!("{}: {:#}", entity, e));
            return;
        }
        report.chunks_written += chunks.len();

        match self.build_vocab(document, &chunks, options).await {
            Ok(true) => report.vocabularies_written += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(entity = %entity, error = %e, "Failed to save vocabulary");
                report.failures.push(format!("{}: {:#}", entity, e));
            }
        }

        if options.chunks_only {
            return;
        }

        match self.embed_chunks(chunks).await {
            Ok(embedded) => report.chunks_embedded += embedded,
            Err(e) => {
                error!(entity = %entity, error = %e, "Failed to embed chunks");
                report.failures.push(format!("{}: {:#}", entity, e));
            }
        }
    }

    async fn build_vocab(
        &self,
        document: &SourceDocument,
        chunks: &[Chunk],
        options: &IndexOptions,
    ) -> Result<bool> {
        if document.stem.is_empty() {
            return Ok(false);
        }
        let texts = chunks.iter().map(|c| c.content.as_str());
        let mut vocab = VocabIndex::build(texts.clone(), &self.predefined_phrases, &*self.tokenizer);
        if options.compute_idf {
            vocab.compute_idf(texts, &*self.tokenizer);
        }
        self.vocab_store.save(&document.stem, &vocab).await?;
        Ok(true)
    }

    /// Embed and upsert chunks as one all-or-nothing batch.
    pub async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<usize> {
        for chunk in &chunks {
            chunk.validate().context("Refusing to embed invalid chunk")?;
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .context("Embedding batch failed")?;
        anyhow::ensure!(
            vectors.len() == chunks.len(),
            "Embedder returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        );

        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord { chunk, vector })
            .collect();
        self.index.upsert(records).await
    }

    async fn embed_persisted(&self, options: &IndexOptions) -> Result<IndexReport> {
        let chunks: Vec<Chunk> = self
            .chunk_store
            .read_all()
            .await?
            .into_iter()
            .filter(|c| options.wants(&c.entity_name))
            .collect();

        let mut report = IndexReport::default();
        let mut by_entity: Vec<(String, Vec<Chunk>)> = Vec::new();
        for chunk in chunks {
            match by_entity.last_mut() {
                Some((entity, group)) if *entity == chunk.entity_name => group.push(chunk),
                _ => by_entity.push((chunk.entity_name.clone(), vec![chunk])),
            }
        }

        for (entity, group) in by_entity {
            report.documents += 1;
            match self.embed_chunks(group).await {
                Ok(embedded) => report.chunks_embedded += embedded,
                Err(e) => {
                    error!(entity = %entity, error = %e, "Failed to embed persisted chunks");
                    report.failures.push(format!("{}: {:#}", entity, e));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder: a small bag-of-characters vector per text.
    #[derive(Default)]
    pub struct FakeEmbedder {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::RateLimited);
            }
            Ok(non_blank(texts)
                .into_iter()
                .map(|text| {
                    let mut vector = vec![0.0f32; 8];
                    for (i, c) in text.chars().enumerate() {
                        vector[(c as usize + i) % 8] += 1.0;
                    }
                    vector
                })
                .collect())
        }
    }
}
