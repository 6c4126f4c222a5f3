//! Domain types shared by the chunk builder, registry, retrieval and guard.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;

/// Stable identity of a source manual. Used as the partition key for every
/// index and registry lookup, so two manuals never share chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManualId(String);

impl ManualId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from a source file path: the file name with the
    /// extraction suffix (`.pages.json`, `.txt`, `.pdf`) removed.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        for suffix in [".pages.json", ".json", ".txt", ".pdf"] {
            if let Some(stem) = name.strip_suffix(suffix) {
                return Self(stem.to_string());
            }
        }
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human readable title: `lancer_2012` -> `lancer 2012`.
    pub fn title(&self) -> String {
        let spaced = self.0.replace(['_', '-'], " ");
        spaced.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for ManualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ManualId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Granularity of a chunk. Ordering runs from the most precise level to the
/// widest context, which is also the tie-break order during re-ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkLevel {
    Small,
    Mid,
    Big,
}

impl ChunkLevel {
    pub const ALL: [ChunkLevel; 3] = [ChunkLevel::Small, ChunkLevel::Mid, ChunkLevel::Big];

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkLevel::Small => "small",
            ChunkLevel::Mid => "mid",
            ChunkLevel::Big => "big",
        }
    }

    /// The enclosing level, `None` for `Big`.
    pub fn parent(self) -> Option<ChunkLevel> {
        match self {
            ChunkLevel::Small => Some(ChunkLevel::Mid),
            ChunkLevel::Mid => Some(ChunkLevel::Big),
            ChunkLevel::Big => None,
        }
    }

    /// The contained level, `None` for `Small`.
    pub fn child(self) -> Option<ChunkLevel> {
        match self {
            ChunkLevel::Small => None,
            ChunkLevel::Mid => Some(ChunkLevel::Small),
            ChunkLevel::Big => Some(ChunkLevel::Mid),
        }
    }
}

impl fmt::Display for ChunkLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "small" => Ok(ChunkLevel::Small),
            "mid" => Ok(ChunkLevel::Mid),
            "big" => Ok(ChunkLevel::Big),
            other => Err(Error::InvalidHierarchy(format!("unknown chunk level '{other}'"))),
        }
    }
}

/// One extracted page as delivered by the PDF source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_number: u32,
    #[serde(default)]
    pub page_label: Option<String>,
    #[serde(default)]
    pub text: String,
}

impl PageRecord {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self { page_number, page_label: None, text: text.into() }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.page_label = Some(label.into());
        self
    }

    /// The printed label, falling back to the page number.
    pub fn label(&self) -> String {
        self.page_label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map_or_else(|| self.page_number.to_string(), str::to_string)
    }
}

/// A page position carried by every chunk for citations.
///
/// `seq` is the zero-based position of the page in the source sequence and is
/// what containment and ordering compare; `number`/`label` are for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRef {
    pub seq: usize,
    pub number: u32,
    pub label: String,
}

/// A contiguous span of manual text at one level of the hierarchy.
///
/// - `id`: unique within the manual, derived from level, position and content
/// - `parent_id`: back-reference to the enclosing chunk (none for `Big`)
/// - `child_ids`: ordered ids of the contained chunks (empty for `Small`)
/// - `lead_in`: overlap borrowed from the previous `Small` chunk; embedded
///   together with `text` but never part of the reconstructed manual text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub manual_id: ManualId,
    pub level: ChunkLevel,
    pub ordinal: usize,
    pub text: String,
    #[serde(default)]
    pub lead_in: String,
    pub page_start: PageRef,
    pub page_end: PageRef,
    pub parent_id: Option<ChunkId>,
    pub child_ids: Vec<ChunkId>,
}

impl Chunk {
    /// Text sent to the embedder.
    pub fn embedding_text(&self) -> String {
        if self.lead_in.is_empty() {
            self.text.clone()
        } else {
            format!("{}{}", self.lead_in, self.text)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// True when `other`'s page range lies inside this chunk's page range.
    pub fn contains_pages_of(&self, other: &Chunk) -> bool {
        self.page_start.seq <= other.page_start.seq && other.page_end.seq <= self.page_end.seq
    }

    /// Citation form of the page range: `p. 4` or `pp. 4-6`.
    pub fn page_citation(&self) -> String {
        page_span_label(&self.page_start, &self.page_end)
    }
}

pub fn page_span_label(start: &PageRef, end: &PageRef) -> String {
    if start.seq == end.seq {
        format!("p. {}", start.label)
    } else {
        format!("pp. {}-{}", start.label, end.label)
    }
}

/// How a hit entered the merged candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitOrigin {
    /// Returned by the level's own similarity search.
    Direct,
    /// Added as the ancestor of a direct hit.
    Expanded,
}

/// Transient retrieval result. `similarity_score` is normalized to `[0, 1]`,
/// higher is closer; `composite_score` is the re-ranking score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub chunk_id: ChunkId,
    pub manual_id: ManualId,
    pub level: ChunkLevel,
    pub similarity_score: f32,
    pub composite_score: f32,
    pub origin: HitOrigin,
    pub page_start: PageRef,
    pub page_end: PageRef,
    /// Parent first, up to the BIG chunk.
    #[serde(default)]
    pub ancestor_ids: Vec<ChunkId>,
}

impl RetrievalHit {
    pub fn page_citation(&self) -> String {
        page_span_label(&self.page_start, &self.page_end)
    }

    pub fn descends_from(&self, chunk_id: &str) -> bool {
        self.ancestor_ids.iter().any(|a| a == chunk_id)
    }
}

/// Raw `(chunk_id, score)` pair returned by a vector index query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// A chunk and its embedding, as written to a vector index partition.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}
