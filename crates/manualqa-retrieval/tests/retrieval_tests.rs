use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use manualqa_core::chunker::ChunkBuilder;
use manualqa_core::error::{Error, Result};
use manualqa_core::events::{PipelineEvent, RecordingSink};
use manualqa_core::registry::ManualRegistry;
use manualqa_core::settings::{ChunkingConfig, RetrievalConfig};
use manualqa_core::traits::VectorIndex;
use manualqa_core::types::{Chunk, ChunkId, ChunkLevel, HitOrigin, IndexRecord, ManualId, PageRecord, ScoredChunk};
use manualqa_embed::HashEmbedder;
use manualqa_retrieval::RetrievalEngine;
use manualqa_vector::{ManualIndexer, MemoryVectorIndex};

const DIM: usize = 64;

/// Counts queries and optionally fails or stalls them.
struct InstrumentedIndex {
    inner: Arc<MemoryVectorIndex>,
    queries: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
}

impl InstrumentedIndex {
    fn over(inner: Arc<MemoryVectorIndex>) -> Self {
        Self { inner, queries: AtomicUsize::new(0), fail: false, delay: None }
    }
}

#[async_trait]
impl VectorIndex for InstrumentedIndex {
    async fn upsert(&self, manual_id: &ManualId, records: &[IndexRecord]) -> Result<()> {
        self.inner.upsert(manual_id, records).await
    }

    async fn query(&self, manual_id: &ManualId, level: ChunkLevel, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Error::Operation("index offline".into()));
        }
        self.inner.query(manual_id, level, vector, top_k).await
    }

    async fn delete_manual(&self, manual_id: &ManualId) -> Result<()> {
        self.inner.delete_manual(manual_id).await
    }

    async fn delete_chunks(&self, manual_id: &ManualId, chunk_ids: &[ChunkId]) -> Result<()> {
        self.inner.delete_chunks(manual_id, chunk_ids).await
    }

    async fn list_manuals(&self) -> Result<Vec<ManualId>> {
        self.inner.list_manuals().await
    }

    async fn load_chunks(&self, manual_id: &ManualId) -> Result<Vec<Chunk>> {
        self.inner.load_chunks(manual_id).await
    }
}

fn budgets() -> ChunkingConfig {
    ChunkingConfig { small_tokens: 10, small_overlap_tokens: 2, mid_tokens: 30, big_tokens: 60, detect_headings: true }
}

fn kettle_pages() -> Vec<PageRecord> {
    vec![
        PageRecord::new(1, "1 Filling\nFill the kettle with fresh water up to the max mark. Close the lid firmly."),
        PageRecord::new(2, "2 Descaling\nDescale the kettle every month with a citric acid solution. Rinse twice."),
    ]
}

fn mower_pages() -> Vec<PageRecord> {
    vec![
        PageRecord::new(1, "1 Blade\nSharpen the mower blade each spring. Disconnect the spark plug first."),
        PageRecord::new(2, "2 Fuel\nDrain the mower fuel before winter storage. Use fresh unleaded petrol."),
    ]
}

async fn fixture() -> (Arc<MemoryVectorIndex>, Arc<ManualRegistry>) {
    let index = Arc::new(MemoryVectorIndex::new());
    let registry = Arc::new(ManualRegistry::new());
    let indexer = ManualIndexer::new(ChunkBuilder::new(budgets()), Arc::new(HashEmbedder::new(DIM)), index.clone(), registry.clone());
    indexer.index_manual(&ManualId::from("kettle"), &kettle_pages()).await.expect("kettle");
    indexer.index_manual(&ManualId::from("mower"), &mower_pages()).await.expect("mower");
    (index, registry)
}

fn engine(index: Arc<dyn VectorIndex>, registry: Arc<ManualRegistry>, config: RetrievalConfig) -> RetrievalEngine {
    RetrievalEngine::new(Arc::new(HashEmbedder::new(DIM)), index, registry, config)
}

#[tokio::test]
async fn hits_stay_inside_the_requested_manual() {
    let (index, registry) = fixture().await;
    let engine = engine(index, registry.clone(), RetrievalConfig::default());
    let kettle = ManualId::from("kettle");
    // the question is about the mower; scope still wins
    let hits = engine.retrieve("sharpen the mower blade", &kettle, 8).await.expect("retrieve");
    let h = registry.hierarchy(&kettle).expect("kettle");
    assert!(!hits.is_empty());
    for hit in &hits {
        assert_eq!(hit.manual_id, kettle);
        assert!(h.get(&hit.chunk_id).is_some());
    }
}

#[tokio::test]
async fn results_are_ranked_expanded_and_bounded() {
    let (index, registry) = fixture().await;
    let sink = Arc::new(RecordingSink::new());
    let engine = engine(index, registry, RetrievalConfig::default()).with_events(sink.clone());
    let hits = engine.retrieve("descale the kettle with citric acid", &ManualId::from("kettle"), 5).await.expect("retrieve");
    assert!(hits.len() <= 5);
    assert!(hits.windows(2).all(|w| w[0].composite_score >= w[1].composite_score));
    assert_eq!(hits[0].page_citation(), "p. 2");
    assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.similarity_score)));
    assert!(matches!(
        sink.events().as_slice(),
        [PipelineEvent::RetrievalCompleted { returned, .. }] if *returned == hits.len()
    ));
}

#[tokio::test]
async fn ancestors_of_direct_hits_are_included() {
    let (index, registry) = fixture().await;
    let config = RetrievalConfig { per_level_k: 1, ..Default::default() };
    let engine = engine(index, registry.clone(), config);
    let kettle = ManualId::from("kettle");
    let hits = engine.retrieve("descale the kettle", &kettle, 20).await.expect("retrieve");
    let h = registry.hierarchy(&kettle).expect("kettle");
    let small = hits.iter().find(|x| x.level == ChunkLevel::Small && x.origin == HitOrigin::Direct).expect("small hit");
    for ancestor in h.ancestors(&small.chunk_id) {
        assert!(hits.iter().any(|x| x.chunk_id == ancestor.id), "missing ancestor {}", ancestor.id);
    }
}

#[tokio::test]
async fn unknown_manual_never_reaches_the_index() {
    let (index, registry) = fixture().await;
    let index = Arc::new(InstrumentedIndex::over(index));
    let engine = engine(index.clone(), registry, RetrievalConfig::default());
    let err = engine.retrieve("anything", &ManualId::from("toaster"), 5).await.unwrap_err();
    assert!(matches!(err, Error::UnknownManual(ref m) if m.as_str() == "toaster"));
    assert_eq!(index.queries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_index_is_unavailable() {
    let (index, registry) = fixture().await;
    let index = Arc::new(InstrumentedIndex { fail: true, ..InstrumentedIndex::over(index) });
    let sink = Arc::new(RecordingSink::new());
    let engine = engine(index, registry, RetrievalConfig::default()).with_events(sink.clone());
    let err = engine.retrieve("kettle", &ManualId::from("kettle"), 5).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable(_)), "got {err:?}");
    assert!(matches!(sink.events().as_slice(), [PipelineEvent::RetrievalFailed { .. }]));
}

#[tokio::test]
async fn slow_index_times_out_without_partial_hits() {
    let (index, registry) = fixture().await;
    let index = Arc::new(InstrumentedIndex { delay: Some(Duration::from_millis(500)), ..InstrumentedIndex::over(index) });
    let config = RetrievalConfig { timeout_ms: 20, ..Default::default() };
    let engine = engine(index, registry, config);
    let err = engine.retrieve("kettle", &ManualId::from("kettle"), 5).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable(ref m) if m.contains("timed out")));
}

#[tokio::test]
async fn empty_partition_is_unavailable() {
    let (index, registry) = fixture().await;
    index.delete_manual(&ManualId::from("mower")).await.expect("delete");
    let engine = engine(index, registry, RetrievalConfig::default());
    let err = engine.retrieve("blade", &ManualId::from("mower"), 5).await.unwrap_err();
    assert!(matches!(err, Error::RetrievalUnavailable(_)));
}

#[tokio::test]
async fn concurrent_retrievals_do_not_mix() {
    let (index, registry) = fixture().await;
    let engine = engine(index, registry, RetrievalConfig::default());
    let kettle = ManualId::from("kettle");
    let mower = ManualId::from("mower");
    let (a, b) = tokio::join!(engine.retrieve("fuel", &kettle, 6), engine.retrieve("fuel", &mower, 6));
    assert!(a.expect("kettle").iter().all(|h| h.manual_id == kettle));
    assert!(b.expect("mower").iter().all(|h| h.manual_id == mower));
}
