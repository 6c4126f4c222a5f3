//! Manual build pipeline: pages -> hierarchy -> embeddings -> vector index ->
//! registry.
//!
//! Manuals are processed concurrently; writes for any single manual are
//! serialized by a per-manual lock so two builds of the same manual never
//! interleave.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use futures::{stream, StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex;
use tracing::{info, warn};

use manualqa_core::chunker::ChunkBuilder;
use manualqa_core::error::{Error, Result};
use manualqa_core::events::{EventSink, NullSink, PipelineEvent};
use manualqa_core::hierarchy::ChunkHierarchy;
use manualqa_core::pages::ManualSource;
use manualqa_core::registry::ManualRegistry;
use manualqa_core::traits::{Embedder, VectorIndex};
use manualqa_core::types::{ChunkId, IndexRecord, ManualId, PageRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub manual_id: ManualId,
    pub chunks: usize,
    /// Loaded from the store instead of rebuilt.
    pub skipped: bool,
}

pub struct ManualIndexer {
    builder: ChunkBuilder,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    registry: Arc<ManualRegistry>,
    events: Arc<dyn EventSink>,
    locks: std::sync::Mutex<HashMap<ManualId, Arc<Mutex<()>>>>,
}

/// Progress bar in the style used for index builds.
pub fn build_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} manuals {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

impl ManualIndexer {
    pub fn new(
        builder: ChunkBuilder,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        registry: Arc<ManualRegistry>,
    ) -> Self {
        Self { builder, embedder, index, registry, events: Arc::new(NullSink), locks: std::sync::Mutex::new(HashMap::new()) }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &Arc<ManualRegistry> {
        &self.registry
    }

    // Entries are never evicted; the map holds one mutex per manual ever seen.
    fn lock_for(&self, manual_id: &ManualId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(manual_id.clone())
            .or_default()
            .clone()
    }

    /// Chunk, embed, replace the persisted rows and register one manual. A
    /// failed build leaves the previously stored and registered copy serving.
    pub async fn index_manual(&self, manual_id: &ManualId, pages: &[PageRecord]) -> Result<IndexReport> {
        let lock = self.lock_for(manual_id);
        let _guard = lock.lock().await;

        let hierarchy = self.builder.build(manual_id, pages)?;
        let texts: Vec<String> = hierarchy.iter().map(|c| c.embedding_text()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(Error::Service(format!("embedded {} of {} chunks for {manual_id}", vectors.len(), texts.len())));
        }
        let records: Vec<IndexRecord> = hierarchy
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexRecord { chunk: chunk.clone(), vector })
            .collect();

        // New rows land before old ones go; the registry only moves once the
        // store holds the complete new hierarchy.
        let previous: Vec<ChunkId> = self.index.load_chunks(manual_id).await?.into_iter().map(|c| c.id).collect();
        self.index.upsert(manual_id, &records).await?;
        let current: HashSet<&str> = records.iter().map(|r| r.chunk.id.as_str()).collect();
        let stale: Vec<ChunkId> = previous.into_iter().filter(|id| !current.contains(id.as_str())).collect();
        self.index.delete_chunks(manual_id, &stale).await?;
        let (small, mid, big) = hierarchy.counts();
        self.registry.register(manual_id, hierarchy)?;

        info!(manual = %manual_id, pages = pages.len(), small, mid, big, stale = stale.len(), "indexed manual");
        self.events.emit(PipelineEvent::ManualIndexed { manual: manual_id.clone(), chunks: records.len(), skipped: false });
        Ok(IndexReport { manual_id: manual_id.clone(), chunks: records.len(), skipped: false })
    }

    /// Register a persisted manual from its stored rows without re-embedding.
    pub async fn rehydrate_manual(&self, manual_id: &ManualId) -> Result<IndexReport> {
        let lock = self.lock_for(manual_id);
        let _guard = lock.lock().await;

        let chunks = self.index.load_chunks(manual_id).await?;
        if chunks.is_empty() {
            return Err(Error::NotFound(format!("no stored chunks for {manual_id}")));
        }
        let count = chunks.len();
        let hierarchy = ChunkHierarchy::from_chunks(manual_id.clone(), chunks)?;
        self.registry.register(manual_id, hierarchy)?;
        self.events.emit(PipelineEvent::ManualIndexed { manual: manual_id.clone(), chunks: count, skipped: true });
        Ok(IndexReport { manual_id: manual_id.clone(), chunks: count, skipped: true })
    }

    /// Rehydrate every manual in the store. Manuals whose rows no longer form
    /// a valid hierarchy are skipped with a warning.
    pub async fn rehydrate_all(&self) -> Result<Vec<IndexReport>> {
        let mut reports = Vec::new();
        for manual_id in self.index.list_manuals().await? {
            match self.rehydrate_manual(&manual_id).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(manual = %manual_id, error = %e, "skipping stale manual in store"),
            }
        }
        Ok(reports)
    }

    /// Build every source, or reuse its stored rows when it is already
    /// persisted and `rebuild` is off.
    pub async fn index_sources(
        &self,
        sources: &[ManualSource],
        rebuild: bool,
        parallel: usize,
        progress: &ProgressBar,
    ) -> Result<Vec<IndexReport>> {
        let persisted: HashSet<ManualId> =
            if rebuild { HashSet::new() } else { self.index.list_manuals().await?.into_iter().collect() };
        let persisted = &persisted;

        let mut reports: Vec<IndexReport> = stream::iter(sources)
            .map(|source| async move {
                let report = if persisted.contains(&source.manual_id) {
                    match self.rehydrate_manual(&source.manual_id).await {
                        Ok(report) => report,
                        Err(e) => {
                            warn!(manual = %source.manual_id, error = %e, "stored manual is unusable; rebuilding");
                            self.index_source(source).await?
                        }
                    }
                } else {
                    self.index_source(source).await?
                };
                progress.set_message(source.manual_id.to_string());
                progress.inc(1);
                Ok::<_, Error>(report)
            })
            .buffer_unordered(parallel.max(1))
            .try_collect()
            .await?;
        progress.finish_with_message("done");
        reports.sort_by(|a, b| a.manual_id.cmp(&b.manual_id));
        Ok(reports)
    }

    async fn index_source(&self, source: &ManualSource) -> Result<IndexReport> {
        let pages = source.load_pages()?;
        self.index_manual(&source.manual_id, &pages).await
    }

    /// Delete one manual's persisted rows and its registry entry.
    pub async fn remove_manual(&self, manual_id: &ManualId) -> Result<()> {
        let lock = self.lock_for(manual_id);
        let _guard = lock.lock().await;
        self.index.delete_manual(manual_id).await?;
        self.registry.remove(manual_id);
        info!(manual = %manual_id, "removed manual");
        Ok(())
    }

    /// Remove stored manuals that are not in `keep`.
    pub async fn prune(&self, keep: &[ManualId]) -> Result<Vec<ManualId>> {
        let mut removed = Vec::new();
        for manual_id in self.index.list_manuals().await? {
            if !keep.contains(&manual_id) {
                self.remove_manual(&manual_id).await?;
                removed.push(manual_id);
            }
        }
        Ok(removed)
    }
}
