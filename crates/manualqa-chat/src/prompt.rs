use manualqa_core::guard::{GroundedEvidence, REFUSAL_TEXT};
use manualqa_core::hierarchy::ChunkHierarchy;
use manualqa_core::traits::Prompt;

/// Strict-grounding instructions sent with every generation call.
pub fn system_prompt() -> String {
    format!(
        "You are a technical assistant answering questions about one product manual.\n\n\
         Rules:\n\
         - Answer ONLY using the manual excerpts provided.\n\
         - If the answer is not explicitly found in the excerpts, reply exactly:\n  \"{REFUSAL_TEXT}\"\n\
         - Do NOT guess or use external knowledge.\n\
         - Keep answers clear, concise, and technical.\n\
         - Refer to page numbers shown with the excerpts when useful."
    )
}

/// Assemble the prompt from guard-approved evidence. Texts come from the
/// registered hierarchy, so nothing outside the evidence set can enter.
pub fn build_prompt(question: &str, evidence: &GroundedEvidence, hierarchy: &ChunkHierarchy) -> Prompt {
    let mut passages = Vec::with_capacity(evidence.len());
    let mut context = String::new();
    for item in evidence.items() {
        let Some(chunk) = hierarchy.get(&item.hit.chunk_id) else {
            continue;
        };
        let text = chunk.text.trim();
        if text.is_empty() {
            continue;
        }
        passages.push(text.to_string());
        context.push_str(&format!("[{}] ({})\n{}\n\n", passages.len(), item.pages, text));
    }
    let user = format!(
        "Manual: {}\n\nExcerpts:\n{}Question: {}",
        evidence.manual_id().title(),
        context,
        question.trim()
    );
    Prompt { system: system_prompt(), user, passages }
}
