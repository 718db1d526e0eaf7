pub mod attributes;
pub mod chunk;
pub mod chunker;
pub mod classify;
pub mod reader;
pub mod store;

pub use attributes::{parse_amount, parse_amount_str};
pub use chunk::{keys, Chunk, ChunkError, ChunkType};
pub use chunker::{window_split, Chunker, ChunkerConfig};
pub use classify::{infer_category, slugify, Classifier, KeywordTable, BENEFIT_KEYWORDS_V1};
pub use reader::{FileReader, SiblingIndex, SiblingMetadata, SourceDocument};
pub use store::ChunkStore;

use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Read one source document and chunk it.
pub async fn ingest_file(
    file_path: &Path,
    chunker: &Chunker,
    siblings: &SiblingIndex,
) -> Result<(SourceDocument, Vec<Chunk>)> {
    let document = FileReader::read_document(file_path).await?;
    let sibling = document
        .entity_name
        .as_deref()
        .or(Some(document.stem.as_str()))
        .and_then(|name| siblings.get(name));

    let chunks = chunker.generate_chunks(&document, sibling);
    info!(
        file = ?file_path,
        chunks = chunks.len(),
        "Chunked document"
    );
    Ok((document, chunks))
}

/// Chunk every supported document under `dir_path`.
pub async fn ingest_directory(
    dir_path: &Path,
    chunker: &Chunker,
    siblings: &SiblingIndex,
) -> Result<Vec<(SourceDocument, Vec<Chunk>)>> {
    let files = FileReader::discover(dir_path)?;

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        documents.push(ingest_file(&path, chunker, siblings).await?);
    }

    Ok(documents)
}
