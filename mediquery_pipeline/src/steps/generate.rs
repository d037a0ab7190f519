//! Answer generator — produces a role-profiled, citation-bearing answer
//! from the relevant documents.
//!
//! The generation service sees documents as numbered `[Ref N]` context
//! blocks and must cite them inline. After generation the markers are
//! renumbered into 1-based first-use order and bound to document ids;
//! markers that point outside the supplied documents are stripped rather
//! than released dangling.

use mediquery_core::{
    AnswerGenerator, CitationRef, Document, PipelineState, PromptProfile, ServiceError,
};
use tracing::{debug, warn};

/// Generate (or regenerate, with `tighten` set) the answer for the current
/// state. `relevant_documents` must be non-empty; the grade transition
/// guarantees that.
pub async fn generate_answer(
    state: &mut PipelineState,
    generator: &dyn AnswerGenerator,
    tighten: bool,
) -> Result<(), ServiceError> {
    let profile = PromptProfile::for_role(state.actor_role);
    let generated = generator
        .generate(profile, &state.current_query, &state.relevant_documents, tighten)
        .await?;

    let (answer, citations) = renumber_citations(&generated.text, &state.relevant_documents);
    if citations.len() != generated.cited.len() {
        debug!(
            reported = generated.cited.len(),
            resolved = citations.len(),
            "generator-reported citation map differs from markers in the answer text"
        );
    }
    if citations.is_empty() {
        warn!("generated answer carries no resolvable citations");
    }

    debug!(
        chars = answer.len(),
        citations = citations.len(),
        tighten,
        "generation complete"
    );
    state.answer = answer;
    state.citations = citations;
    Ok(())
}

/// Rewrite `[Ref N]` markers into 1-based first-use order and bind each
/// distinct marker to its document. Markers referencing an index outside
/// `documents` are removed from the text.
pub(crate) fn renumber_citations(
    text: &str,
    documents: &[Document],
) -> (String, Vec<CitationRef>) {
    let mut output = String::with_capacity(text.len());
    let mut citations: Vec<CitationRef> = Vec::new();
    // original 1-based ref -> assigned marker
    let mut assigned: Vec<(usize, usize)> = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("[Ref ") {
        output.push_str(&rest[..start]);
        let tail = &rest[start + 5..];
        let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
        let after_digits = &tail[digits.len()..];
        if !digits.is_empty() && after_digits.starts_with(']') {
            rest = &after_digits[1..];
            let original: usize = digits.parse().unwrap_or(0);
            if original >= 1 && original <= documents.len() {
                let marker = match assigned.iter().find(|(orig, _)| *orig == original) {
                    Some((_, marker)) => *marker,
                    None => {
                        let marker = assigned.len() + 1;
                        assigned.push((original, marker));
                        citations.push(CitationRef {
                            marker,
                            document_id: documents[original - 1].id.clone(),
                        });
                        marker
                    }
                };
                output.push_str(&format!("[Ref {marker}]"));
            } else {
                warn!(marker = original, "dropping citation marker outside document range");
            }
        } else {
            // Not a well-formed marker; emit literally and continue after "[Ref ".
            output.push_str("[Ref ");
            rest = tail;
        }
    }
    output.push_str(rest);

    (output, citations)
}
