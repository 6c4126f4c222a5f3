//! Grounding guard: decides from retrieved evidence alone whether a turn may
//! be answered.
//!
//! An answer can only be generated from `GroundedEvidence`, and the only way
//! to obtain one is an `Answer` decision from `GroundingGuard::evaluate`.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::settings::GuardPolicy;
use crate::types::{HitOrigin, ManualId, RetrievalHit};

/// The only text a user ever sees for a refusal, whatever the reason.
pub const REFUSAL_TEXT: &str = "Not found in the manual.";

/// Why a turn was refused. Reason codes are for logs and events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefuseReason {
    NoHits,
    LowConfidence,
    InsufficientCoverage,
    RetrievalUnavailable,
    NoManualScope,
}

impl RefuseReason {
    pub fn code(&self) -> &'static str {
        match self {
            RefuseReason::NoHits => "no_hits",
            RefuseReason::LowConfidence => "low_confidence",
            RefuseReason::InsufficientCoverage => "insufficient_coverage",
            RefuseReason::RetrievalUnavailable => "retrieval_unavailable",
            RefuseReason::NoManualScope => "no_manual_scope",
        }
    }
}

impl fmt::Display for RefuseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A hit that passed coverage, with its citation label.
#[derive(Debug, Clone)]
pub struct EvidenceItem {
    pub hit: RetrievalHit,
    pub pages: String,
}

/// Evidence that cleared the guard, ordered by composite score descending.
#[derive(Debug, Clone)]
pub struct GroundedEvidence {
    manual_id: ManualId,
    items: Vec<EvidenceItem>,
}

impl GroundedEvidence {
    pub(crate) fn new(manual_id: ManualId, items: Vec<EvidenceItem>) -> Self {
        Self { manual_id, items }
    }

    pub fn manual_id(&self) -> &ManualId {
        &self.manual_id
    }

    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum GuardDecision {
    Answer(GroundedEvidence),
    Refuse(RefuseReason),
}

impl GuardDecision {
    pub fn is_answer(&self) -> bool {
        matches!(self, GuardDecision::Answer(_))
    }

    pub fn refuse_reason(&self) -> Option<RefuseReason> {
        match self {
            GuardDecision::Answer(_) => None,
            GuardDecision::Refuse(r) => Some(*r),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroundingGuard {
    policy: GuardPolicy,
}

impl GroundingGuard {
    pub fn new(policy: GuardPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Refuse on no hits, on a top similarity below `min_confidence`, or when
    /// fewer than `min_coverage_hits` distinct lineages exceed
    /// `coverage_threshold`. Hits from more than one manual are refused
    /// outright.
    ///
    /// Only directly retrieved hits count, and a hit whose covered descendant
    /// was also retrieved shares that descendant's lineage. Expanded
    /// ancestors travel with the evidence but never add coverage.
    pub fn evaluate(&self, hits: &[RetrievalHit], query: &str) -> GuardDecision {
        let Some(first) = hits.first() else {
            debug!(query, reason = "no_hits", "guard refused");
            return GuardDecision::Refuse(RefuseReason::NoHits);
        };
        if hits.iter().any(|h| h.manual_id != first.manual_id) {
            debug!(query, "hits span several manuals; refusing");
            return GuardDecision::Refuse(RefuseReason::NoHits);
        }

        let top = hits.iter().map(|h| h.similarity_score).fold(f32::MIN, f32::max);
        if top < self.policy.min_confidence {
            debug!(query, top, min_confidence = self.policy.min_confidence, "guard refused: low confidence");
            return GuardDecision::Refuse(RefuseReason::LowConfidence);
        }

        let mut passed: Vec<&RetrievalHit> =
            hits.iter().filter(|h| h.similarity_score > self.policy.coverage_threshold).collect();
        let covered = lineages(&passed);
        if covered < self.policy.min_coverage_hits {
            debug!(
                query,
                covered,
                required = self.policy.min_coverage_hits,
                "guard refused: insufficient coverage"
            );
            return GuardDecision::Refuse(RefuseReason::InsufficientCoverage);
        }

        passed.sort_by(|a, b| b.composite_score.partial_cmp(&a.composite_score).unwrap_or(Ordering::Equal));
        let items: Vec<EvidenceItem> = passed
            .into_iter()
            .map(|h| EvidenceItem { hit: h.clone(), pages: h.page_citation() })
            .collect();
        debug!(query, top, evidence = items.len(), "guard answered");
        GuardDecision::Answer(GroundedEvidence::new(first.manual_id.clone(), items))
    }
}

/// Directly retrieved hits with no directly retrieved descendant among `hits`.
fn lineages(hits: &[&RetrievalHit]) -> usize {
    let direct: Vec<&RetrievalHit> = hits.iter().copied().filter(|h| h.origin == HitOrigin::Direct).collect();
    direct
        .iter()
        .filter(|h| !direct.iter().any(|d| d.descends_from(&h.chunk_id)))
        .count()
}
