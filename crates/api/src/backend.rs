use anyhow::Result;
use index::{EmbeddingRecord, MemoryIndex, MetadataFilter, QdrantIndex, SearchHit, VectorIndex};
use query::{OllamaJudge, RelevanceJudge, Unjudged, Verdict};

/// Vector index selected at startup.
pub enum VectorBackend {
    Memory(MemoryIndex),
    Qdrant(QdrantIndex),
}

impl VectorBackend {
    pub fn name(&self) -> &'static str {
        match self {
            VectorBackend::Memory(_) => "memory",
            VectorBackend::Qdrant(_) => "qdrant",
        }
    }
}

impl VectorIndex for VectorBackend {
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        match self {
            VectorBackend::Memory(index) => index.upsert(records).await,
            VectorBackend::Qdrant(index) => index.upsert(records).await,
        }
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        match self {
            VectorBackend::Memory(index) => index.search(vector, k, filter).await,
            VectorBackend::Qdrant(index) => index.search(vector, k, filter).await,
        }
    }

    async fn get(&self, filter: &MetadataFilter) -> Result<Vec<SearchHit>> {
        match self {
            VectorBackend::Memory(index) => index.get(filter).await,
            VectorBackend::Qdrant(index) => index.get(filter).await,
        }
    }

    async fn count(&self) -> Result<usize> {
        match self {
            VectorBackend::Memory(index) => index.count().await,
            VectorBackend::Qdrant(index) => index.count().await,
        }
    }
}

pub enum JudgeBackend {
    Off,
    Ollama(OllamaJudge),
}

impl RelevanceJudge for JudgeBackend {
    async fn judge(&self, query: &str, hits: &[SearchHit]) -> Vec<Option<Verdict>> {
        match self {
            JudgeBackend::Off => Unjudged.judge(query, hits).await,
            JudgeBackend::Ollama(judge) => judge.judge(query, hits).await,
        }
    }
}
