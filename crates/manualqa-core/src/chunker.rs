//! Hierarchical chunk builder.
//!
//! Pages are cut into SMALL segments on a word budget (never across a page),
//! SMALL segments are grouped into MID chunks and MID chunks into BIG chunks
//! on larger budgets or at detected headings. Every level covers the manual
//! text exactly once; overlap between neighbouring SMALL segments is carried
//! separately as `lead_in` and only feeds the embedder.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::hierarchy::{ChunkHierarchy, PAGE_BREAK};
use crate::settings::ChunkingConfig;
use crate::types::{Chunk, ChunkId, ChunkLevel, ManualId, PageRecord, PageRef};

static NUMBERED_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})((?:\.\d{1,2})*)\.?\s+\p{Lu}").expect("valid heading pattern")
});

/// Structural weight of a heading line. `Major` headings open a new BIG
/// chunk, any heading opens a new MID chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingKind {
    Major,
    Minor,
}

/// Approximate token count used for every budget: words / 0.75.
pub fn count_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f32 / 0.75) as usize
}

fn words_for_tokens(tokens: usize) -> usize {
    (tokens as f32 * 0.75) as usize
}

/// Classify a single line as a section heading.
///
/// Numbered lines (`3 Engine`, `3.2 Oil level`) and short ALL-CAPS lines count;
/// sentences (trailing `.`, `,` or `;`) and long lines never do.
pub fn classify_heading(line: &str) -> Option<HeadingKind> {
    let line = line.trim();
    if line.is_empty() || line.chars().count() > 80 || line.split_whitespace().count() > 12 {
        return None;
    }
    if line.ends_with(['.', ',', ';']) {
        return None;
    }
    if let Some(caps) = NUMBERED_HEADING.captures(line) {
        let nested = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
        return Some(if nested { HeadingKind::Minor } else { HeadingKind::Major });
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase()) {
        return Some(HeadingKind::Major);
    }
    None
}

/// Page-ordered manual text: page texts joined by `PAGE_BREAK`. Every level of
/// a built hierarchy reconstructs to exactly this string.
pub fn page_ordered_text(pages: &[PageRecord]) -> String {
    pages.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join(PAGE_BREAK)
}

#[derive(Debug, Clone)]
struct Span {
    text: String,
    first: usize,
    last: usize,
    tokens: usize,
    heading: Option<HeadingKind>,
}

impl Span {
    fn merge(spans: &[Span]) -> Span {
        let mut text = String::new();
        for (i, s) in spans.iter().enumerate() {
            if i > 0 && s.first != spans[i - 1].last {
                text.push_str(PAGE_BREAK);
            }
            text.push_str(&s.text);
        }
        Span {
            text,
            first: spans.first().map_or(0, |s| s.first),
            last: spans.last().map_or(0, |s| s.last),
            tokens: spans.iter().map(|s| s.tokens).sum(),
            heading: spans.first().and_then(|s| s.heading),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkBuilder {
    config: ChunkingConfig,
}

impl ChunkBuilder {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Build the full hierarchy for one manual. Deterministic: the same pages
    /// and config always give the same chunks and ids.
    pub fn build(&self, manual_id: &ManualId, pages: &[PageRecord]) -> Result<ChunkHierarchy> {
        if pages.is_empty() {
            return Err(Error::InvalidHierarchy(format!("{manual_id}: no pages to chunk")));
        }
        let refs: Vec<PageRef> = pages
            .iter()
            .enumerate()
            .map(|(seq, p)| PageRef { seq, number: p.page_number, label: p.label() })
            .collect();

        let max_words = words_for_tokens(self.config.small_tokens).max(1);
        let smalls: Vec<Span> = pages
            .iter()
            .enumerate()
            .flat_map(|(seq, p)| self.segment_page(seq, &p.text, max_words))
            .collect();

        let mid_groups = group(&smalls, self.config.mid_tokens, |h| h.is_some());
        let mids: Vec<Span> = mid_groups.iter().map(|r| Span::merge(&smalls[r.clone()])).collect();
        let big_groups = group(&mids, self.config.big_tokens, |h| h == Some(HeadingKind::Major));
        let bigs: Vec<Span> = big_groups.iter().map(|r| Span::merge(&mids[r.clone()])).collect();

        let small_ids = assign_ids(manual_id, ChunkLevel::Small, &smalls);
        let mid_ids = assign_ids(manual_id, ChunkLevel::Mid, &mids);
        let big_ids = assign_ids(manual_id, ChunkLevel::Big, &bigs);

        let overlap_words = words_for_tokens(self.config.small_overlap_tokens);
        let mut small_chunks = Vec::with_capacity(smalls.len());
        for (m, range) in mid_groups.iter().enumerate() {
            for i in range.clone() {
                let lead_in = if i > range.start && smalls[i - 1].last == smalls[i].first {
                    lead_in_of(&smalls[i - 1].text, overlap_words)
                } else {
                    String::new()
                };
                small_chunks.push(make_chunk(
                    manual_id,
                    ChunkLevel::Small,
                    i,
                    &small_ids[i],
                    &smalls[i],
                    &refs,
                    lead_in,
                    Some(mid_ids[m].clone()),
                    Vec::new(),
                ));
            }
        }

        let mut mid_chunks = Vec::with_capacity(mids.len());
        for (b, range) in big_groups.iter().enumerate() {
            for m in range.clone() {
                mid_chunks.push(make_chunk(
                    manual_id,
                    ChunkLevel::Mid,
                    m,
                    &mid_ids[m],
                    &mids[m],
                    &refs,
                    String::new(),
                    Some(big_ids[b].clone()),
                    small_ids[mid_groups[m].clone()].to_vec(),
                ));
            }
        }

        let big_chunks: Vec<Chunk> = bigs
            .iter()
            .enumerate()
            .map(|(b, span)| {
                make_chunk(
                    manual_id,
                    ChunkLevel::Big,
                    b,
                    &big_ids[b],
                    span,
                    &refs,
                    String::new(),
                    None,
                    mid_ids[big_groups[b].clone()].to_vec(),
                )
            })
            .collect();

        debug!(
            manual = %manual_id,
            pages = pages.len(),
            small = small_chunks.len(),
            mid = mid_chunks.len(),
            big = big_chunks.len(),
            "built chunk hierarchy"
        );
        let hierarchy = ChunkHierarchy::assemble(manual_id.clone(), small_chunks, mid_chunks, big_chunks);
        hierarchy.validate()?;
        Ok(hierarchy)
    }

    /// Cut one page into SMALL spans covering the page text byte for byte.
    fn segment_page(&self, seq: usize, text: &str, max_words: usize) -> Vec<Span> {
        let words = word_starts(text);
        if words.is_empty() {
            return vec![Span { text: text.to_string(), first: seq, last: seq, tokens: 0, heading: None }];
        }
        let headings = if self.config.detect_headings { heading_starts(text) } else { HashMap::new() };

        let mut cuts = vec![(0usize, headings.get(&words[0]).copied())];
        let mut in_segment = 0usize;
        for &start in &words {
            let heading = headings.get(&start).copied();
            if in_segment > 0 && (in_segment >= max_words || heading.is_some()) {
                cuts.push((start, heading));
                in_segment = 0;
            }
            in_segment += 1;
        }

        cuts.iter()
            .enumerate()
            .map(|(i, &(start, heading))| {
                let end = cuts.get(i + 1).map_or(text.len(), |c| c.0);
                let piece = &text[start..end];
                Span { text: piece.to_string(), first: seq, last: seq, tokens: count_tokens(piece), heading }
            })
            .collect()
    }
}

/// Close a group when the budget would overflow or a structural break starts
/// the next unit. Groups are never empty.
fn group(units: &[Span], budget: usize, breaks: impl Fn(Option<HeadingKind>) -> bool) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut start = 0;
    let mut acc = 0;
    for (i, unit) in units.iter().enumerate() {
        if i > start && (acc + unit.tokens > budget || breaks(unit.heading)) {
            groups.push(start..i);
            start = i;
            acc = 0;
        }
        acc += unit.tokens;
    }
    if start < units.len() {
        groups.push(start..units.len());
    }
    groups
}

fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut in_word = false;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            starts.push(i);
            in_word = true;
        }
    }
    starts
}

/// Byte offsets of the first word of every heading line.
fn heading_starts(text: &str) -> HashMap<usize, HeadingKind> {
    let mut out = HashMap::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(kind) = classify_heading(trimmed) {
            out.insert(offset + (line.len() - trimmed.len()), kind);
        }
        offset += line.len();
    }
    out
}

fn lead_in_of(previous: &str, overlap_words: usize) -> String {
    if overlap_words == 0 {
        return String::new();
    }
    let words: Vec<&str> = previous.split_whitespace().collect();
    let tail = &words[words.len().saturating_sub(overlap_words)..];
    if tail.is_empty() {
        String::new()
    } else {
        format!("{} ", tail.join(" "))
    }
}

fn assign_ids(manual_id: &ManualId, level: ChunkLevel, spans: &[Span]) -> Vec<ChunkId> {
    spans
        .iter()
        .enumerate()
        .map(|(ordinal, span)| {
            let mut hasher = blake3::Hasher::new();
            hasher.update(manual_id.as_str().as_bytes());
            hasher.update(&[0]);
            hasher.update(level.as_str().as_bytes());
            hasher.update(&(ordinal as u64).to_le_bytes());
            hasher.update(&(span.first as u64).to_le_bytes());
            hasher.update(span.text.as_bytes());
            let hex = hasher.finalize().to_hex();
            format!("{manual_id}:{level}:{ordinal}:{}", &hex[..16])
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn make_chunk(
    manual_id: &ManualId,
    level: ChunkLevel,
    ordinal: usize,
    id: &str,
    span: &Span,
    refs: &[PageRef],
    lead_in: String,
    parent_id: Option<ChunkId>,
    child_ids: Vec<ChunkId>,
) -> Chunk {
    Chunk {
        id: id.to_string(),
        manual_id: manual_id.clone(),
        level,
        ordinal,
        text: span.text.clone(),
        lead_in,
        page_start: refs[span.first].clone(),
        page_end: refs[span.last].clone(),
        parent_id,
        child_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_matches_word_ratio() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("one two three"), 4);
        assert_eq!(words_for_tokens(300), 225);
    }

    #[test]
    fn heading_classification() {
        assert_eq!(classify_heading("3 Engine"), Some(HeadingKind::Major));
        assert_eq!(classify_heading("3.2 Oil level"), Some(HeadingKind::Minor));
        assert_eq!(classify_heading("MAINTENANCE SCHEDULE"), Some(HeadingKind::Major));
        assert_eq!(classify_heading("Check the oil level regularly."), None);
        assert_eq!(classify_heading("12 months or 10,000 km, whichever comes first"), None);
        assert_eq!(classify_heading("OK"), None);
        assert_eq!(classify_heading(""), None);
    }

    #[test]
    fn segments_cover_page_exactly() {
        let builder = ChunkBuilder::new(ChunkingConfig { small_tokens: 4, small_overlap_tokens: 1, ..Default::default() });
        let text = "  alpha beta gamma\ndelta epsilon zeta eta  ";
        let spans = builder.segment_page(0, text, 3);
        assert_eq!(spans.len(), 3);
        let joined: String = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn headings_start_new_segments() {
        let builder = ChunkBuilder::default();
        let text = "intro words here\n2.1 Tyre pressure\ncheck when cold";
        let spans = builder.segment_page(0, text, 100);
        assert_eq!(spans.len(), 2);
        assert!(spans[1].text.starts_with("2.1 Tyre"));
        assert_eq!(spans[1].heading, Some(HeadingKind::Minor));
    }

    #[test]
    fn lead_in_takes_trailing_words() {
        assert_eq!(lead_in_of("a b c d", 2), "c d ");
        assert_eq!(lead_in_of("a b", 0), "");
        assert_eq!(lead_in_of("   ", 3), "");
    }
}
