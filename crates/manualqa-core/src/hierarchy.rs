//! The three-level chunk hierarchy of one manual.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::{Chunk, ChunkId, ChunkLevel, ManualId};

/// Separator placed between the texts of consecutive pages when a level is
/// flattened back into manual text.
pub const PAGE_BREAK: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct ChunkHierarchy {
    manual_id: ManualId,
    small: Vec<Chunk>,
    mid: Vec<Chunk>,
    big: Vec<Chunk>,
    by_id: HashMap<ChunkId, (ChunkLevel, usize)>,
}

/// Id-free description of one chunk, used to compare two builds of the same
/// manual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkShape {
    pub level: ChunkLevel,
    pub ordinal: usize,
    pub text: String,
    pub pages: (u32, u32),
    pub labels: (String, String),
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl ChunkHierarchy {
    /// Assemble from loose chunks (e.g. rows read back from the store) and
    /// check every structural invariant.
    pub fn from_chunks(manual_id: ManualId, chunks: Vec<Chunk>) -> Result<Self> {
        let (mut small, mut mid, mut big) = (Vec::new(), Vec::new(), Vec::new());
        for c in chunks {
            match c.level {
                ChunkLevel::Small => small.push(c),
                ChunkLevel::Mid => mid.push(c),
                ChunkLevel::Big => big.push(c),
            }
        }
        for level in [&mut small, &mut mid, &mut big] {
            level.sort_by_key(|c| c.ordinal);
        }
        let hierarchy = Self::assemble(manual_id, small, mid, big);
        hierarchy.validate()?;
        Ok(hierarchy)
    }

    pub(crate) fn assemble(manual_id: ManualId, small: Vec<Chunk>, mid: Vec<Chunk>, big: Vec<Chunk>) -> Self {
        let mut by_id = HashMap::with_capacity(small.len() + mid.len() + big.len());
        for (level, chunks) in [(ChunkLevel::Small, &small), (ChunkLevel::Mid, &mid), (ChunkLevel::Big, &big)] {
            for (i, c) in chunks.iter().enumerate() {
                by_id.insert(c.id.clone(), (level, i));
            }
        }
        Self { manual_id, small, mid, big, by_id }
    }

    pub fn manual_id(&self) -> &ManualId {
        &self.manual_id
    }

    pub fn level(&self, level: ChunkLevel) -> &[Chunk] {
        match level {
            ChunkLevel::Small => &self.small,
            ChunkLevel::Mid => &self.mid,
            ChunkLevel::Big => &self.big,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.by_id.get(id).map(|(level, i)| &self.level(*level)[*i])
    }

    pub fn parent(&self, chunk: &Chunk) -> Option<&Chunk> {
        chunk.parent_id.as_deref().and_then(|p| self.get(p))
    }

    /// Enclosing chunks from the nearest parent up to `Big`.
    pub fn ancestors(&self, id: &str) -> Vec<&Chunk> {
        let mut out = Vec::new();
        let mut current = self.get(id);
        while let Some(c) = current.and_then(|c| self.parent(c)) {
            out.push(c);
            current = Some(c);
        }
        out
    }

    pub fn children(&self, chunk: &Chunk) -> Vec<&Chunk> {
        chunk.child_ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.small.len() + self.mid.len() + self.big.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every chunk, small level first.
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.small.iter().chain(self.mid.iter()).chain(self.big.iter())
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.small.len(), self.mid.len(), self.big.len())
    }

    /// Flatten one level back to page-ordered text.
    pub fn reconstruct(&self, level: ChunkLevel) -> String {
        let mut out = String::new();
        let mut last_page: Option<usize> = None;
        for c in self.level(level) {
            if let Some(prev) = last_page {
                if c.page_start.seq != prev {
                    out.push_str(PAGE_BREAK);
                }
            }
            out.push_str(&c.text);
            last_page = Some(c.page_end.seq);
        }
        out
    }

    pub fn shape(&self) -> Vec<ChunkShape> {
        self.iter()
            .map(|c| ChunkShape {
                level: c.level,
                ordinal: c.ordinal,
                text: c.text.clone(),
                pages: (c.page_start.number, c.page_end.number),
                labels: (c.page_start.label.clone(), c.page_end.label.clone()),
                parent: self.parent(c).map(|p| p.ordinal),
                children: self.children(c).iter().map(|ch| ch.ordinal).collect(),
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::InvalidHierarchy(format!("{}: {msg}", self.manual_id)));

        for level in ChunkLevel::ALL {
            let chunks = self.level(level);
            if chunks.is_empty() {
                return fail(format!("no {level} chunks"));
            }
            for (i, c) in chunks.iter().enumerate() {
                if c.manual_id != self.manual_id {
                    return fail(format!("chunk {} belongs to manual {}", c.id, c.manual_id));
                }
                if c.ordinal != i {
                    return fail(format!("{level} ordinals are not contiguous at {}", c.id));
                }
                if c.page_start.seq > c.page_end.seq {
                    return fail(format!("chunk {} has an inverted page range", c.id));
                }
                match (level.parent(), self.parent(c)) {
                    (None, None) if c.parent_id.is_none() => {}
                    (None, _) => return fail(format!("big chunk {} has a parent", c.id)),
                    (Some(_), None) => return fail(format!("chunk {} has a dangling parent", c.id)),
                    (Some(parent_level), Some(p)) => {
                        if p.level != parent_level || !p.child_ids.contains(&c.id) {
                            return fail(format!("chunk {} is not listed by its parent {}", c.id, p.id));
                        }
                        if !p.contains_pages_of(c) {
                            return fail(format!("chunk {} pages escape parent {}", c.id, p.id));
                        }
                    }
                }
                if level == ChunkLevel::Small && !c.child_ids.is_empty() {
                    return fail(format!("small chunk {} has children", c.id));
                }
                for child in &c.child_ids {
                    let ok = self
                        .get(child)
                        .is_some_and(|ch| Some(ch.level) == level.child() && ch.parent_id.as_deref() == Some(c.id.as_str()));
                    if !ok {
                        return fail(format!("chunk {} lists foreign child {child}", c.id));
                    }
                }
            }
        }
        if self.by_id.len() != self.len() {
            return fail("duplicate chunk ids".to_string());
        }
        Ok(())
    }
}
