//! Wiring shared by the indexer and chat binaries.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use manualqa_core::chunker::ChunkBuilder;
use manualqa_core::config::Config;
use manualqa_core::events::{EventSink, NullSink, TracingSink};
use manualqa_core::pages::{discover, ManualSource};
use manualqa_core::registry::ManualRegistry;
use manualqa_core::settings::Settings;
use manualqa_core::traits::Embedder;
use manualqa_core::types::ManualId;
use manualqa_embed::get_default_embedder;
use manualqa_vector::{LanceVectorIndex, ManualIndexer};

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `app.debug = true`.
pub fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

pub struct AppContext {
    pub settings: Settings,
    pub manuals_dir: PathBuf,
    pub registry: Arc<ManualRegistry>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<LanceVectorIndex>,
    pub events: Arc<dyn EventSink>,
    pub indexer: ManualIndexer,
}

impl AppContext {
    pub async fn open(config: &Config, manuals_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = config.settings()?;
        let manuals_dir = manuals_dir.unwrap_or_else(|| config.path(&settings.data.manuals_dir));
        let store_dir = config.path(&settings.data.store_dir);
        fs::create_dir_all(&store_dir).with_context(|| format!("creating store dir {}", store_dir.display()))?;

        let embedder: Arc<dyn Embedder> = Arc::new(get_default_embedder(&settings)?);
        let index = Arc::new(LanceVectorIndex::open(&store_dir, &settings.data.table, embedder.dim()).await?);
        let registry = Arc::new(ManualRegistry::new());
        let events: Arc<dyn EventSink> = if settings.app.debug { Arc::new(TracingSink) } else { Arc::new(NullSink) };
        let indexer = ManualIndexer::new(
            ChunkBuilder::new(settings.chunking.clone()),
            embedder.clone(),
            index.clone(),
            registry.clone(),
        )
        .with_events(events.clone());
        info!(store = %store_dir.display(), table = %settings.data.table, dim = embedder.dim(), "opened manual store");

        Ok(Self { settings, manuals_dir, registry, embedder, index, events, indexer })
    }

    /// Page sources under the manuals directory; a missing directory yields
    /// none so a chat can still run from the store.
    pub fn sources(&self) -> anyhow::Result<Vec<ManualSource>> {
        if !self.manuals_dir.is_dir() {
            warn!(dir = %self.manuals_dir.display(), "manuals directory not found");
            return Ok(Vec::new());
        }
        Ok(discover(&self.manuals_dir)?)
    }
}

/// Resolve a `--manual` argument (id or file name) against discovered sources.
pub fn pick_source(sources: &[ManualSource], wanted: &str) -> Option<ManualSource> {
    let id = ManualId::from_path(Path::new(wanted));
    sources.iter().find(|s| s.manual_id == id).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_source_accepts_ids_and_file_names() {
        let sources = vec![
            ManualSource { manual_id: ManualId::from("kettle"), path: PathBuf::from("/m/kettle.txt") },
            ManualSource { manual_id: ManualId::from("mower"), path: PathBuf::from("/m/mower.pages.json") },
        ];
        assert_eq!(pick_source(&sources, "kettle").map(|s| s.manual_id), Some(ManualId::from("kettle")));
        assert_eq!(pick_source(&sources, "mower.pdf").map(|s| s.manual_id), Some(ManualId::from("mower")));
        assert!(pick_source(&sources, "toaster").is_none());
    }
}
