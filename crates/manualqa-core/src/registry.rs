//! In-process registry of chunk hierarchies keyed by manual.
//!
//! Owned by the application context and shared behind `Arc`. Hierarchies are
//! immutable once registered; re-registering swaps the whole hierarchy under
//! the write lock so readers see either the old or the new one.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::error::{Error, Result};
use crate::hierarchy::ChunkHierarchy;
use crate::types::{Chunk, ChunkLevel, ManualId};

#[derive(Debug, Default)]
pub struct ManualRegistry {
    manuals: RwLock<BTreeMap<ManualId, Arc<ChunkHierarchy>>>,
}

impl ManualRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a manual's hierarchy.
    pub fn register(&self, manual_id: &ManualId, hierarchy: ChunkHierarchy) -> Result<()> {
        if hierarchy.manual_id() != manual_id {
            return Err(Error::InvalidHierarchy(format!(
                "hierarchy of {} registered as {manual_id}",
                hierarchy.manual_id()
            )));
        }
        hierarchy.validate()?;
        let (small, mid, big) = hierarchy.counts();
        let replaced = self
            .manuals
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(manual_id.clone(), Arc::new(hierarchy))
            .is_some();
        info!(manual = %manual_id, small, mid, big, replaced, "registered manual");
        Ok(())
    }

    pub fn exists(&self, manual_id: &ManualId) -> bool {
        self.manuals.read().unwrap_or_else(PoisonError::into_inner).contains_key(manual_id)
    }

    /// Registered manuals in id order.
    pub fn list_manuals(&self) -> Vec<ManualId> {
        self.manuals.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
    }

    pub fn hierarchy(&self, manual_id: &ManualId) -> Result<Arc<ChunkHierarchy>> {
        self.manuals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(manual_id)
            .cloned()
            .ok_or_else(|| Error::UnknownManual(manual_id.clone()))
    }

    pub fn chunks_of(&self, manual_id: &ManualId, level: ChunkLevel) -> Result<Vec<Chunk>> {
        Ok(self.hierarchy(manual_id)?.level(level).to_vec())
    }

    pub fn remove(&self, manual_id: &ManualId) -> bool {
        self.manuals.write().unwrap_or_else(PoisonError::into_inner).remove(manual_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.manuals.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
