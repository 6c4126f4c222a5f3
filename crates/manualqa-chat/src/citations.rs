//! Page citations, taken from evidence metadata only.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use manualqa_core::guard::GroundedEvidence;
use manualqa_core::types::{ManualId, PageRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGroup {
    pub manual_id: ManualId,
    pub title: String,
    /// Page labels or label ranges such as `5-6`, numeric ones first.
    pub pages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sources(pub Vec<SourceGroup>);

impl Sources {
    pub fn from_evidence(evidence: &GroundedEvidence) -> Self {
        let mut grouped: BTreeMap<ManualId, Vec<String>> = BTreeMap::new();
        for item in evidence.items() {
            let pages = grouped.entry(item.hit.manual_id.clone()).or_default();
            let span = span(&item.hit.page_start, &item.hit.page_end);
            if !pages.contains(&span) {
                pages.push(span);
            }
        }
        let groups = grouped
            .into_iter()
            .map(|(manual_id, mut pages)| {
                pages.sort_by(|a, b| compare_labels(a, b));
                SourceGroup { title: manual_id.title(), manual_id, pages }
            })
            .collect();
        Self(groups)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        write!(f, "Sources:")?;
        for group in &self.0 {
            if group.pages.is_empty() {
                write!(f, "\n- {}", group.title)?;
            } else {
                write!(f, "\n- {} (pages: {})", group.title, group.pages.join(", "))?;
            }
        }
        Ok(())
    }
}

fn span(start: &PageRef, end: &PageRef) -> String {
    if start.seq == end.seq {
        start.label.clone()
    } else {
        format!("{}-{}", start.label, end.label)
    }
}

fn leading_number(label: &str) -> Option<u64> {
    let first = label.split('-').next()?;
    if first.is_empty() || !first.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    first.parse().ok()
}

/// Numeric labels in numeric order, then everything else lexically.
fn compare_labels(a: &str, b: &str) -> Ordering {
    match (leading_number(a), leading_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
