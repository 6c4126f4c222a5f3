//! Manual scope state machine.
//!
//! ```text
//! UNSET ──one manual──────────▶ FIXED(m)
//! UNSET ──several, no cue─────▶ AMBIGUOUS ──next turn──▶ UNSET / FIXED
//! any   ──selection or mention▶ FIXED(m)        FIXED(m) ──no cue──▶ FIXED(m)
//! ```
//!
//! `/manual` pins the scope so later mentions do not move it; `/clear` drops
//! the pin and the scope.

use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::ManualRegistry;
use crate::selector::ManualSelector;
use crate::types::ManualId;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScopeState {
    #[default]
    Unset,
    Fixed(ManualId),
    /// Waiting for the user to pick one of `candidates`; `pending` is the
    /// question that could not be scoped.
    Ambiguous {
        candidates: Vec<ManualId>,
        pending: String,
    },
}

impl ScopeState {
    pub fn name(&self) -> &'static str {
        match self {
            ScopeState::Unset => "unset",
            ScopeState::Fixed(_) => "fixed",
            ScopeState::Ambiguous { .. } => "ambiguous",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub query: String,
    pub manual: Option<ManualId>,
}

/// Per-session scope state. Lives for the process only.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    scope: ScopeState,
    pinned: bool,
    turn_history: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self) -> &ScopeState {
        &self.scope
    }

    pub fn active_manual(&self) -> Option<&ManualId> {
        match &self.scope {
            ScopeState::Fixed(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn turn_history(&self) -> &[Turn] {
        &self.turn_history
    }
}

/// Outcome of resolving one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Retrieve from `manual` for `question` (the pending question when the
    /// turn answered a disambiguation prompt).
    Fixed { manual: ManualId, question: String },
    /// Ask the user to choose; nothing is retrieved this turn.
    Ambiguous(Vec<ManualId>),
    /// Nothing is registered to answer from.
    NoManuals,
}

#[derive(Debug, Clone, Default)]
pub struct ScopeResolver {
    selector: ManualSelector,
}

impl ScopeResolver {
    pub fn new(selector: ManualSelector) -> Self {
        Self { selector }
    }

    /// Explicit selection: fix and pin `manual_id`. Unknown ids fail and leave
    /// the state untouched.
    pub fn select(&self, state: &mut ConversationState, manual_id: &ManualId, registry: &ManualRegistry) -> Result<()> {
        if !registry.exists(manual_id) {
            return Err(Error::UnknownManual(manual_id.clone()));
        }
        state.scope = ScopeState::Fixed(manual_id.clone());
        state.pinned = true;
        Ok(())
    }

    pub fn clear(&self, state: &mut ConversationState) {
        state.scope = ScopeState::Unset;
        state.pinned = false;
    }

    /// Resolve the scope for a free-text turn and record it in the history.
    pub fn resolve(&self, state: &mut ConversationState, query: &str, registry: &ManualRegistry) -> Resolution {
        let manuals = registry.list_manuals();
        let resolution = self.next(state, query, &manuals);
        let resolved = match &resolution {
            Resolution::Fixed { manual, .. } => Some(manual.clone()),
            _ => None,
        };
        debug!(state = state.scope.name(), manual = ?resolved, pinned = state.pinned, "scope resolved");
        state.turn_history.push(Turn { query: query.to_string(), manual: resolved });
        resolution
    }

    fn next(&self, state: &mut ConversationState, query: &str, manuals: &[ManualId]) -> Resolution {
        // An ambiguous scope only lasts one turn.
        if let ScopeState::Ambiguous { candidates, pending } = std::mem::take(&mut state.scope) {
            if let Some(choice) = pick_by_index(query, &candidates).filter(|m| manuals.contains(m)) {
                state.scope = ScopeState::Fixed(choice.clone());
                return Resolution::Fixed { manual: choice, question: pending };
            }
        }

        if !state.pinned {
            if let Some(mention) = self.selector.detect(query, manuals) {
                state.scope = ScopeState::Fixed(mention.manual_id.clone());
                return Resolution::Fixed { manual: mention.manual_id, question: query.to_string() };
            }
        }

        if let ScopeState::Fixed(m) = &state.scope {
            if manuals.contains(m) {
                return Resolution::Fixed { manual: m.clone(), question: query.to_string() };
            }
            state.pinned = false;
        }

        match manuals {
            [] => {
                state.scope = ScopeState::Unset;
                Resolution::NoManuals
            }
            [only] => {
                state.scope = ScopeState::Fixed(only.clone());
                Resolution::Fixed { manual: only.clone(), question: query.to_string() }
            }
            several => {
                state.scope = ScopeState::Ambiguous { candidates: several.to_vec(), pending: query.to_string() };
                Resolution::Ambiguous(several.to_vec())
            }
        }
    }
}

/// A reply such as `2` picks the second listed manual.
fn pick_by_index(reply: &str, candidates: &[ManualId]) -> Option<ManualId> {
    let n: usize = reply.trim().trim_end_matches('.').parse().ok()?;
    n.checked_sub(1).and_then(|i| candidates.get(i)).cloned()
}
