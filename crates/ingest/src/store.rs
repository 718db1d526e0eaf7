use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::chunk::Chunk;
use crate::classify::slugify;

/// JSON Lines persistence, one file per entity named after its slug.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, entity_name: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", slugify(entity_name)))
    }

    /// Write chunks grouped by entity, replacing any previous file for that entity.
    /// Every chunk is validated before anything is written.
    pub async fn write(&self, chunks: &[Chunk]) -> Result<Vec<PathBuf>> {
        for chunk in chunks {
            chunk
                .validate()
                .context("Refusing to persist invalid chunk")?;
        }

        let mut by_entity: BTreeMap<PathBuf, Vec<&Chunk>> = BTreeMap::new();
        for chunk in chunks {
            by_entity
                .entry(self.path_for(&chunk.entity_name))
                .or_default()
                .push(chunk);
        }

        // Distinct entities whose names slugify alike would overwrite each other.
        for (path, entity_chunks) in &by_entity {
            let owner = entity_chunks[0].entity_name.as_str();
            if let Some(other) = entity_chunks.iter().find(|c| c.entity_name != owner) {
                anyhow::bail!(
                    "Entities {:?} and {:?} share chunk file {:?}",
                    owner,
                    other.entity_name,
                    path
                );
            }
            if let Some(existing) = Self::owner_of(path).await? {
                anyhow::ensure!(
                    existing == owner,
                    "Chunk file {:?} already belongs to entity {:?}, refusing to overwrite with {:?}",
                    path,
                    existing,
                    owner
                );
            }
        }

        fs::create_dir_all(&self.dir)
            .await
            .context(format!("Failed to create chunk dir: {:?}", self.dir))?;

        let mut written = Vec::with_capacity(by_entity.len());
        for (path, entity_chunks) in by_entity {
            let mut body = String::new();
            for chunk in &entity_chunks {
                body.push_str(&serde_json::to_string(chunk)?);
                body.push('\n');
            }
            fs::write(&path, body)
                .await
                .context(format!("Failed to write chunks: {:?}", path))?;
            info!(path = ?path, chunks = entity_chunks.len(), "Saved chunks");
            written.push(path);
        }

        Ok(written)
    }

    /// Entity name of the first chunk in an existing file.
    async fn owner_of(path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        Ok(Self::read(path)
            .await?
            .into_iter()
            .next()
            .map(|chunk| chunk.entity_name))
    }

    pub async fn read(path: &Path) -> Result<Vec<Chunk>> {
        let content = fs::read_to_string(path)
            .await
            .context(format!("Failed to read chunk file: {:?}", path))?;

        let mut chunks = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(line)
                .context(format!("Malformed chunk at {:?}:{}", path, line_no + 1))?;
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    /// All persisted chunks, files in name order.
    pub async fn read_all(&self) -> Result<Vec<Chunk>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .context(format!("Failed to list chunk dir: {:?}", self.dir))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut chunks = Vec::new();
        for path in paths {
            chunks.extend(Self::read(&path).await?);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkType;

    fn chunk(entity: &str, ordinal: usize, content: &str) -> Chunk {
        Chunk {
            id: Chunk::make_id(&slugify(entity), ChunkType::Benefit, ordinal),
            entity_name: entity.to_string(),
            entity_group: "Shinhan".to_string(),
            chunk_type: ChunkType::Benefit,
            category: None,
            content: content.to_string(),
            numeric_attributes: BTreeMap::new(),
            tag_attributes: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_write_then_read_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        let chunks = vec![
            chunk("Deep Dream", 1, "first"),
            chunk("Mr.Life", 1, "other"),
            chunk("Deep Dream", 2, "second"),
        ];

        let paths = store.write(&chunks).await.unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&dir.path().join("Deep-Dream.jsonl")));

        let deep = ChunkStore::read(&store.path_for("Deep Dream")).await.unwrap();
        let contents: Vec<&str> = deep.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(store.read_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_blank_chunk_is_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("chunks"));
        let result = store.write(&[chunk("Deep Dream", 1, "ok"), chunk("Deep Dream", 2, " ")]).await;

        assert!(result.is_err());
        assert!(!dir.path().join("chunks").exists());
    }

    #[tokio::test]
    async fn test_colliding_slugs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        assert_eq!(store.path_for("My WE:SH"), store.path_for("My WE SH"));

        store.write(&[chunk("My WE:SH", 1, "colon")]).await.unwrap();
        assert!(store.write(&[chunk("My WE SH", 1, "space")]).await.is_err());
        let kept = ChunkStore::read(&store.path_for("My WE:SH")).await.unwrap();
        assert_eq!(kept[0].content, "colon");

        // rewriting the same entity still replaces its file
        store.write(&[chunk("My WE:SH", 1, "updated")]).await.unwrap();
        let kept = ChunkStore::read(&store.path_for("My WE:SH")).await.unwrap();
        assert_eq!(kept[0].content, "updated");

        let other = tempfile::tempdir().unwrap();
        let batch = [chunk("My WE:SH", 1, "colon"), chunk("My WE SH", 1, "space")];
        assert!(ChunkStore::new(other.path()).write(&batch).await.is_err());
        assert!(ChunkStore::new(other.path()).read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_all_on_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path().join("nothing"));
        assert!(store.read_all().await.unwrap().is_empty());
    }
}
