//! Merge, ancestor expansion and re-ranking of per-level hits.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::warn;

use manualqa_core::hierarchy::ChunkHierarchy;
use manualqa_core::settings::RetrievalConfig;
use manualqa_core::types::{Chunk, HitOrigin, RetrievalHit, ScoredChunk};

struct Candidate<'a> {
    chunk: &'a Chunk,
    similarity: f32,
    origin: HitOrigin,
}

/// Turn raw per-level results into the final ranked hit list.
///
/// Direct hits keep their own similarity. An ancestor that was not retrieved
/// on its own enters as `Expanded` with the best similarity among its
/// retrieved descendants. Every candidate gains `cooccurrence_boost` per
/// ancestor that was also retrieved directly.
pub(crate) fn merge_and_rank(
    hierarchy: &ChunkHierarchy,
    direct: Vec<ScoredChunk>,
    config: &RetrievalConfig,
    k: usize,
) -> Vec<RetrievalHit> {
    let mut by_id: HashMap<&str, Candidate<'_>> = HashMap::new();
    for scored in &direct {
        let Some(chunk) = hierarchy.get(&scored.chunk_id) else {
            warn!(manual = %hierarchy.manual_id(), chunk = %scored.chunk_id, "index row has no registered chunk");
            continue;
        };
        by_id
            .entry(chunk.id.as_str())
            .and_modify(|c| c.similarity = c.similarity.max(scored.score))
            .or_insert(Candidate { chunk, similarity: scored.score, origin: HitOrigin::Direct });
    }
    let direct_ids: HashSet<&str> = by_id.keys().copied().collect();

    let seeds: Vec<(&Chunk, f32)> = by_id.values().map(|c| (c.chunk, c.similarity)).collect();
    for (chunk, similarity) in seeds {
        for ancestor in hierarchy.ancestors(&chunk.id) {
            if direct_ids.contains(ancestor.id.as_str()) {
                continue;
            }
            by_id
                .entry(ancestor.id.as_str())
                .and_modify(|c| c.similarity = c.similarity.max(similarity))
                .or_insert(Candidate { chunk: ancestor, similarity, origin: HitOrigin::Expanded });
        }
    }

    let mut hits: Vec<RetrievalHit> = by_id
        .into_values()
        .map(|c| {
            let mut weight = config.level_weight(c.chunk.level);
            if c.origin == HitOrigin::Expanded {
                weight *= config.expansion_weight;
            }
            let ancestors = hierarchy.ancestors(&c.chunk.id);
            let cooccurring = ancestors.iter().filter(|a| direct_ids.contains(a.id.as_str())).count();
            RetrievalHit {
                chunk_id: c.chunk.id.clone(),
                manual_id: c.chunk.manual_id.clone(),
                level: c.chunk.level,
                similarity_score: c.similarity,
                composite_score: weight * c.similarity + config.cooccurrence_boost * cooccurring as f32,
                origin: c.origin,
                page_start: c.chunk.page_start.clone(),
                page_end: c.chunk.page_end.clone(),
                ancestor_ids: ancestors.iter().map(|a| a.id.clone()).collect(),
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(Ordering::Equal)
            .then(a.level.cmp(&b.level))
            .then(a.page_start.seq.cmp(&b.page_start.seq))
            .then_with(|| ordinal(hierarchy, &a.chunk_id).cmp(&ordinal(hierarchy, &b.chunk_id)))
    });
    hits.truncate(k);
    hits
}

fn ordinal(hierarchy: &ChunkHierarchy, id: &str) -> usize {
    hierarchy.get(id).map_or(usize::MAX, |c| c.ordinal)
}
