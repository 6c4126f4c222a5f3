//! Manual-scoped hierarchical retrieval.
//!
//! Every index call carries the manual id, so the partition filter is applied
//! at the source; the engine never sees rows from another manual.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::debug;

use manualqa_core::error::{Error, Result};
use manualqa_core::events::{EventSink, NullSink, PipelineEvent};
use manualqa_core::registry::ManualRegistry;
use manualqa_core::settings::RetrievalConfig;
use manualqa_core::traits::{Embedder, VectorIndex};
use manualqa_core::types::{ChunkLevel, ManualId, RetrievalHit, ScoredChunk};

use crate::rank::merge_and_rank;

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    registry: Arc<ManualRegistry>,
    config: RetrievalConfig,
    events: Arc<dyn EventSink>,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        registry: Arc<ManualRegistry>,
        config: RetrievalConfig,
    ) -> Self {
        Self { embedder, index, registry, config, events: Arc::new(NullSink) }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Top `k` hits for `query` within `manual_id`.
    ///
    /// Errors: `UnknownManual` for unregistered ids; `RetrievalUnavailable`
    /// when the partition is empty, the index fails or the request times
    /// out (never a partial hit set); embedding failures pass through.
    pub async fn retrieve(&self, query: &str, manual_id: &ManualId, k: usize) -> Result<Vec<RetrievalHit>> {
        let hierarchy = self.registry.hierarchy(manual_id)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let direct = match tokio::time::timeout(timeout, self.search_levels(query, manual_id)).await {
            Ok(Ok(direct)) => direct,
            Ok(Err(e)) => return Err(self.failed(manual_id, e)),
            Err(_) => {
                let e = Error::RetrievalUnavailable(format!("retrieval timed out after {}ms", self.config.timeout_ms));
                return Err(self.failed(manual_id, e));
            }
        };
        if direct.is_empty() {
            let e = Error::RetrievalUnavailable(format!("no indexed chunks for manual {manual_id}"));
            return Err(self.failed(manual_id, e));
        }

        let direct_count = direct.len();
        let hits = merge_and_rank(&hierarchy, direct, &self.config, k);
        debug!(manual = %manual_id, direct = direct_count, returned = hits.len(), "retrieval completed");
        self.events.emit(PipelineEvent::RetrievalCompleted {
            manual: manual_id.clone(),
            direct: direct_count,
            returned: hits.len(),
            top: hits.first().map(|h| (h.level, h.similarity_score)),
        });
        Ok(hits)
    }

    async fn search_levels(&self, query: &str, manual_id: &ManualId) -> Result<Vec<ScoredChunk>> {
        let vector = self.embedder.embed(query).await?;
        let per_level = self.config.per_level_k;
        let searches = ChunkLevel::ALL.map(|level| {
            let vector = &vector;
            async move {
                self.index.query(manual_id, level, vector, per_level).await.map_err(|e| match e {
                    Error::RetrievalUnavailable(_) => e,
                    other => Error::RetrievalUnavailable(format!("{level} search failed: {other}")),
                })
            }
        });
        Ok(try_join_all(searches).await?.into_iter().flatten().collect())
    }

    fn failed(&self, manual_id: &ManualId, error: Error) -> Error {
        self.events.emit(PipelineEvent::RetrievalFailed { manual: manual_id.clone(), reason: error.to_string() });
        error
    }
}
