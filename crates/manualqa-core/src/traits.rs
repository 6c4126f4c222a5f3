use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chunk, ChunkId, ChunkLevel, IndexRecord, ManualId, ScoredChunk};

/// Embedding service contract. Vectors for one `embedder_id` share a
/// dimensionality and are L2-normalized.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

/// Vector index partitioned by manual. Implementations must apply the
/// manual (and level) filter before scoring so a query can never see another
/// manual's rows.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, manual_id: &ManualId, records: &[IndexRecord]) -> Result<()>;

    async fn query(
        &self,
        manual_id: &ManualId,
        level: ChunkLevel,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Drop every row of one manual's partition, leaving other manuals intact.
    async fn delete_manual(&self, manual_id: &ManualId) -> Result<()>;

    /// Drop the listed rows of one manual. Unknown ids are ignored.
    async fn delete_chunks(&self, manual_id: &ManualId, chunk_ids: &[ChunkId]) -> Result<()>;

    async fn list_manuals(&self) -> Result<Vec<ManualId>>;

    /// Chunk metadata stored for one manual, in no particular order.
    async fn load_chunks(&self, manual_id: &ManualId) -> Result<Vec<Chunk>>;
}

/// A prompt ready for the generation service. `passages` are the evidence
/// texts already rendered into `user`, best first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub passages: Vec<String>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}
