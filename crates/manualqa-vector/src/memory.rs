use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use manualqa_core::error::{Error, Result};
use manualqa_core::traits::VectorIndex;
use manualqa_core::types::{Chunk, ChunkId, ChunkLevel, IndexRecord, ManualId, ScoredChunk};

type Partition = HashMap<String, (Chunk, Vec<f32>)>;

/// Exact cosine search over in-process partitions, one map per manual.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    partitions: RwLock<BTreeMap<ManualId, Partition>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, manual_id: &ManualId) -> usize {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(manual_id)
            .map_or(0, HashMap::len)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, manual_id: &ManualId, records: &[IndexRecord]) -> Result<()> {
        if let Some(stray) = records.iter().find(|r| &r.chunk.manual_id != manual_id) {
            return Err(Error::InvalidHierarchy(format!(
                "chunk {} belongs to {}, not {manual_id}",
                stray.chunk.id, stray.chunk.manual_id
            )));
        }
        let mut partitions = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        let partition = partitions.entry(manual_id.clone()).or_default();
        for r in records {
            partition.insert(r.chunk.id.clone(), (r.chunk.clone(), r.vector.clone()));
        }
        Ok(())
    }

    async fn query(&self, manual_id: &ManualId, level: ChunkLevel, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        let Some(partition) = partitions.get(manual_id) else {
            return Err(Error::RetrievalUnavailable(format!("no vectors for manual {manual_id}")));
        };
        let mut scored: Vec<ScoredChunk> = partition
            .values()
            .filter(|(chunk, _)| chunk.level == level)
            .map(|(chunk, v)| ScoredChunk { chunk_id: chunk.id.clone(), score: cosine(vector, v).clamp(0.0, 1.0) })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_manual(&self, manual_id: &ManualId) -> Result<()> {
        self.partitions.write().unwrap_or_else(PoisonError::into_inner).remove(manual_id);
        Ok(())
    }

    async fn delete_chunks(&self, manual_id: &ManualId, chunk_ids: &[ChunkId]) -> Result<()> {
        let mut partitions = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(partition) = partitions.get_mut(manual_id) {
            for id in chunk_ids {
                partition.remove(id);
            }
            if partition.is_empty() {
                partitions.remove(manual_id);
            }
        }
        Ok(())
    }

    async fn list_manuals(&self) -> Result<Vec<ManualId>> {
        Ok(self.partitions.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect())
    }

    async fn load_chunks(&self, manual_id: &ManualId) -> Result<Vec<Chunk>> {
        Ok(self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(manual_id)
            .map(|p| p.values().map(|(c, _)| c.clone()).collect())
            .unwrap_or_default())
    }
}
