//! Turn pipeline: scope -> retrieval -> guard -> generation -> citations.
//!
//! The guard always runs before generation, and generation only receives
//! `GroundedEvidence`, which nothing but an `Answer` decision can produce.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use manualqa_core::error::{Error, Result};
use manualqa_core::events::{EventSink, NullSink, PipelineEvent};
use manualqa_core::guard::{GroundedEvidence, GroundingGuard, GuardDecision, RefuseReason, REFUSAL_TEXT};
use manualqa_core::registry::ManualRegistry;
use manualqa_core::scope::{ConversationState, Resolution, ScopeResolver};
use manualqa_core::selector::ManualSelector;
use manualqa_core::settings::Settings;
use manualqa_core::traits::Generator;
use manualqa_core::types::ManualId;
use manualqa_retrieval::RetrievalEngine;

use crate::citations::Sources;
use crate::commands::{Command, HELP};
use crate::prompt::build_prompt;

/// What the user sees for one input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Answer { text: String, sources: Sources },
    /// Rendered as the refusal text whatever the reason; `None` means the
    /// model itself declined.
    Refused { reason: Option<RefuseReason> },
    Clarify { candidates: Vec<ManualId> },
    Info(String),
    Exit,
}

impl Reply {
    pub fn is_refusal(&self) -> bool {
        matches!(self, Reply::Refused { .. })
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Answer { text, sources } if sources.is_empty() => f.write_str(text),
            Reply::Answer { text, sources } => write!(f, "{text}\n\n{sources}"),
            Reply::Refused { .. } => f.write_str(REFUSAL_TEXT),
            Reply::Clarify { candidates } => {
                writeln!(f, "Several manuals are loaded. Which one do you mean?")?;
                for (i, m) in candidates.iter().enumerate() {
                    writeln!(f, "  {}. {} ({m})", i + 1, m.title())?;
                }
                write!(f, "Reply with a number, or use /manual <id>.")
            }
            Reply::Info(text) => f.write_str(text),
            Reply::Exit => Ok(()),
        }
    }
}

/// Shared, read-only machinery behind every session.
pub struct ChatPipeline {
    registry: Arc<ManualRegistry>,
    resolver: ScopeResolver,
    engine: RetrievalEngine,
    guard: GroundingGuard,
    generator: Arc<dyn Generator>,
    events: Arc<dyn EventSink>,
    top_k: usize,
}

impl ChatPipeline {
    pub fn new(
        settings: &Settings,
        registry: Arc<ManualRegistry>,
        engine: RetrievalEngine,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            registry,
            resolver: ScopeResolver::new(ManualSelector::new(&settings.scope)),
            engine,
            guard: GroundingGuard::new(settings.guard.clone()),
            generator,
            events: Arc::new(NullSink),
            top_k: settings.retrieval.top_k,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &Arc<ManualRegistry> {
        &self.registry
    }

    pub fn session(self: &Arc<Self>) -> ChatSession {
        ChatSession { pipeline: Arc::clone(self), state: ConversationState::new() }
    }

    fn manual_listing(&self) -> String {
        let manuals = self.registry.list_manuals();
        if manuals.is_empty() {
            return "No manuals are loaded.".to_string();
        }
        let mut out = String::from("Available manuals:");
        for m in manuals {
            out.push_str(&format!("\n - {m} ({})", m.title()));
        }
        out
    }

    /// Match a `/manual` argument against registered ids, file names and
    /// titles; falls back to the raw text so selection reports it as unknown.
    fn lookup(&self, wanted: &str) -> ManualId {
        let from_file = ManualId::from_path(std::path::Path::new(wanted));
        self.registry
            .list_manuals()
            .into_iter()
            .find(|m| m.as_str() == wanted || *m == from_file || m.title().eq_ignore_ascii_case(wanted))
            .unwrap_or_else(|| ManualId::new(wanted))
    }

    fn command(&self, state: &mut ConversationState, command: Command) -> Reply {
        match command {
            Command::Exit => Reply::Exit,
            Command::Help => Reply::Info(HELP.to_string()),
            Command::Manuals => Reply::Info(self.manual_listing()),
            Command::Clear => {
                self.resolver.clear(state);
                Reply::Info("[manual unlocked]".to_string())
            }
            Command::Manual(None) => Reply::Info("Usage: /manual <id>".to_string()),
            Command::Manual(Some(wanted)) => {
                let manual_id = self.lookup(&wanted);
                match self.resolver.select(state, &manual_id, &self.registry) {
                    Ok(()) => {
                        info!(manual = %manual_id, "manual pinned");
                        self.emit_scope(state);
                        Reply::Info(format!("[manual locked] {}", manual_id.title()))
                    }
                    Err(e) => Reply::Info(format!("{e}\n{}", self.manual_listing())),
                }
            }
        }
    }

    fn emit_scope(&self, state: &ConversationState) {
        self.events.emit(PipelineEvent::ScopeResolved {
            state: state.scope().name(),
            manual: state.active_manual().cloned(),
            pinned: state.is_pinned(),
        });
    }

    fn refuse(&self, manual: Option<&ManualId>, reason: RefuseReason) -> Reply {
        debug!(manual = ?manual, reason = %reason, "refusing turn");
        self.events.emit(PipelineEvent::GuardDecided {
            manual: manual.cloned(),
            answered: false,
            reason: Some(reason),
            evidence: 0,
        });
        Reply::Refused { reason: Some(reason) }
    }

    /// Handle one input line for the session owning `state`.
    pub async fn handle(&self, state: &mut ConversationState, input: &str) -> Result<Reply> {
        let line = input.trim();
        if line.is_empty() {
            return Ok(Reply::Info(String::new()));
        }
        if let Some(command) = Command::parse(line) {
            return Ok(self.command(state, command));
        }

        let resolution = self.resolver.resolve(state, line, &self.registry);
        self.emit_scope(state);
        let (manual, question) = match resolution {
            Resolution::NoManuals => return Ok(self.refuse(None, RefuseReason::NoManualScope)),
            Resolution::Ambiguous(candidates) => return Ok(Reply::Clarify { candidates }),
            Resolution::Fixed { manual, question } => (manual, question),
        };

        let hits = match self.engine.retrieve(&question, &manual, self.top_k).await {
            Ok(hits) => hits,
            Err(Error::RetrievalUnavailable(msg)) => {
                debug!(manual = %manual, %msg, "retrieval unavailable");
                return Ok(self.refuse(Some(&manual), RefuseReason::RetrievalUnavailable));
            }
            Err(e) => return Err(e),
        };

        let evidence = match self.guard.evaluate(&hits, &question) {
            GuardDecision::Refuse(reason) => return Ok(self.refuse(Some(&manual), reason)),
            GuardDecision::Answer(evidence) => evidence,
        };
        self.events.emit(PipelineEvent::GuardDecided {
            manual: Some(manual.clone()),
            answered: true,
            reason: None,
            evidence: evidence.len(),
        });
        self.generate(&question, evidence).await
    }

    async fn generate(&self, question: &str, evidence: GroundedEvidence) -> Result<Reply> {
        let manual = evidence.manual_id().clone();
        let hierarchy = self.registry.hierarchy(&manual)?;
        let prompt = build_prompt(question, &evidence, &hierarchy);
        let text = self.generator.generate(&prompt).await?;
        let model_refused = text.contains(REFUSAL_TEXT);
        self.events.emit(PipelineEvent::GenerationCompleted { manual, chars: text.len(), model_refused });
        if model_refused {
            return Ok(Reply::Refused { reason: None });
        }
        Ok(Reply::Answer { text, sources: Sources::from_evidence(&evidence) })
    }
}

/// One conversation. Turns are processed one at a time through `&mut self`.
pub struct ChatSession {
    pipeline: Arc<ChatPipeline>,
    state: ConversationState,
}

impl ChatSession {
    pub async fn ask(&mut self, input: &str) -> Result<Reply> {
        self.pipeline.handle(&mut self.state, input).await
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }
}
