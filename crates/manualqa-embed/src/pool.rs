//! Bounded embedding worker pool.
//!
//! Every call to the wrapped embedder holds a semaphore permit, so at most
//! `concurrency` requests are in flight across all users of the pool, and
//! rate-limited calls are retried with backoff before they give up.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use tokio::sync::Semaphore;

use manualqa_core::error::{Error, Result};
use manualqa_core::retry::{with_backoff, RetryPolicy};
use manualqa_core::traits::Embedder;

#[derive(Clone)]
pub struct ThrottledEmbedder {
    inner: Arc<dyn Embedder>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl ThrottledEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, concurrency: usize, batch_size: usize, retry: RetryPolicy) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    async fn call_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::Service(format!("embedding pool closed: {e}")))?;
        let vectors = with_backoff(&self.retry, "embed", || self.inner.embed_batch(batch)).await?;
        if vectors.len() != batch.len() {
            return Err(Error::Service(format!("embedder returned {} vectors for {} texts", vectors.len(), batch.len())));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for ThrottledEmbedder {
    fn embedder_id(&self) -> &str {
        self.inner.embedder_id()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.call_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::Service("embedder returned no vector".into()))
    }

    /// Split into batches and embed them concurrently; output order matches
    /// input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let calls: Vec<_> = texts.chunks(self.batch_size).map(|batch| self.call_batch(batch)).collect();
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(calls)
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }
}
