//! Pipeline orchestrator — an explicit state machine over the step modules.
//!
//! Every transition is a pure function of the current stage and the state
//! the step just mutated, so the whole control flow is visible in one
//! `match`. Termination is guaranteed twice over: the retry and
//! regeneration counters bound the two loops, and a global step ceiling
//! catches any transition bug before it can spin.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use mediquery_config::MediqueryConfig;
use mediquery_core::{
    AnswerGenerator, CollectionId, CollectionSearch, GroundingVerdict, JudgmentService,
    PipelineResult, PipelineState, ResponseType, Role,
};
use tracing::{debug, info, info_span, Instrument};

use crate::steps;

/// Preamble released as the answer text of a clarification response, ahead
/// of the clarifying options.
pub const CLARIFICATION_PREAMBLE: &str =
    "Your question could refer to several different topics. \
     To find the right documents, please clarify:";

/// Answer text released when the retry budget is exhausted with no
/// relevant documents.
pub const FALLBACK_ANSWER: &str =
    "No grounded information matching your question was found in the \
     collections you have access to. Rephrasing with more specific \
     clinical terms may help.";

/// Stages of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Clarify,
    Retrieve,
    Grade,
    Transform,
    Generate,
    Verify,
    Done,
}

/// Loop bounds for one run. Defaults come from `[pipeline]` config; a
/// caller can narrow them per request.
#[derive(Debug, Clone, Copy)]
pub struct PipelineLimits {
    /// Query-rewrite retries after attempts with no relevant documents.
    pub max_retries: u32,
    /// Answer regenerations after failed grounding checks.
    pub max_generation_attempts: u32,
}

/// The assembled pipeline: three capability services plus configuration.
///
/// Cheap to clone per request (services are shared behind `Arc`). Dropping
/// the future returned by [`Pipeline::run`] cancels in-flight collection
/// searches and completion calls.
#[derive(Clone)]
pub struct Pipeline {
    judge: Arc<dyn JudgmentService>,
    search: Arc<dyn CollectionSearch>,
    generator: Arc<dyn AnswerGenerator>,
    config: MediqueryConfig,
}

impl Pipeline {
    pub fn new(
        judge: Arc<dyn JudgmentService>,
        search: Arc<dyn CollectionSearch>,
        generator: Arc<dyn AnswerGenerator>,
        config: MediqueryConfig,
    ) -> Self {
        Self {
            judge,
            search,
            generator,
            config,
        }
    }

    /// Answer one question with the configured loop bounds.
    pub async fn run(
        &self,
        question: &str,
        role: Role,
        allowed_collections: BTreeSet<CollectionId>,
    ) -> anyhow::Result<PipelineResult> {
        let limits = PipelineLimits {
            max_retries: self.config.pipeline.max_retries,
            max_generation_attempts: self.config.pipeline.max_generation_attempts,
        };
        self.run_with_limits(question, role, allowed_collections, limits)
            .await
    }

    /// Answer one question with per-call loop bounds.
    pub async fn run_with_limits(
        &self,
        question: &str,
        role: Role,
        allowed_collections: BTreeSet<CollectionId>,
        limits: PipelineLimits,
    ) -> anyhow::Result<PipelineResult> {
        let mut state = PipelineState::new(question, role, allowed_collections);
        let span = info_span!("pipeline_run", role = ?role, collections = state.allowed_collections.len());

        async {
            info!(question = %state.question, "pipeline run started");

            // Each retry re-runs retrieve+grade(+transform), each regeneration
            // re-runs generate+verify; the slack covers the fixed stages. Any
            // transition bug trips this before it can spin.
            let ceiling = 8 + limits.max_retries * 3 + limits.max_generation_attempts * 2;
            let mut stage = Stage::Clarify;
            let mut steps_taken = 0u32;

            while stage != Stage::Done {
                steps_taken += 1;
                if steps_taken > ceiling {
                    anyhow::bail!(
                        "pipeline exceeded its step ceiling ({ceiling}) at stage {stage:?}"
                    );
                }

                stage = match stage {
                    Stage::Clarify => {
                        let ambiguous = steps::clarification_check(
                            &mut state,
                            self.judge.as_ref(),
                            self.config.pipeline.max_clarification_options,
                        )
                        .instrument(info_span!("clarify"))
                        .await;
                        if ambiguous {
                            state.answer = CLARIFICATION_PREAMBLE.to_string();
                            state.response_type = Some(ResponseType::Clarification);
                            Stage::Done
                        } else {
                            Stage::Retrieve
                        }
                    }
                    Stage::Retrieve => {
                        let attempt = state.retry_count + 1;
                        steps::retrieve(&mut state, Arc::clone(&self.search), &self.config.retrieval)
                            .instrument(info_span!("retrieve", attempt))
                            .await;
                        Stage::Grade
                    }
                    Stage::Grade => {
                        steps::grade_documents(&mut state, Arc::clone(&self.judge))
                            .instrument(info_span!("grade"))
                            .await;
                        if !state.relevant_documents.is_empty() {
                            Stage::Generate
                        } else if state.retry_count < limits.max_retries {
                            Stage::Transform
                        } else {
                            info!(
                                retries = state.retry_count,
                                "retry budget exhausted with no relevant documents"
                            );
                            state.answer = FALLBACK_ANSWER.to_string();
                            state.response_type = Some(ResponseType::Fallback);
                            Stage::Done
                        }
                    }
                    Stage::Transform => {
                        let retry = state.retry_count + 1;
                        steps::transform_query(&mut state, self.generator.as_ref())
                            .instrument(info_span!("transform", retry))
                            .await;
                        Stage::Retrieve
                    }
                    Stage::Generate => {
                        let tighten = state.generation_attempts > 0;
                        let attempt = state.generation_attempts + 1;
                        steps::generate_answer(&mut state, self.generator.as_ref(), tighten)
                            .instrument(info_span!("generate", attempt))
                            .await
                            .context("answer generation failed")?;
                        Stage::Verify
                    }
                    Stage::Verify => {
                        let grounded = steps::verify_grounding(&state, self.judge.as_ref())
                            .instrument(info_span!("verify"))
                            .await;
                        if grounded {
                            state.grounding_verdict = GroundingVerdict::Grounded;
                            state.response_type = Some(ResponseType::Answer);
                            Stage::Done
                        } else if state.generation_attempts < limits.max_generation_attempts {
                            state.generation_attempts += 1;
                            Stage::Generate
                        } else {
                            // Out of regenerations: release flagged, never
                            // silently upgraded and never discarded.
                            state.grounding_verdict = GroundingVerdict::Unverified;
                            state.response_type = Some(ResponseType::Answer);
                            Stage::Done
                        }
                    }
                    Stage::Done => Stage::Done,
                };
            }

            state.confidence_score = steps::confidence_score(&state);
            debug_assert!(state.citations_resolve());
            let result = finish(state);
            info!(
                response = ?result.response_type,
                verdict = ?result.grounding_verdict,
                confidence = result.confidence_score,
                retries = result.retry_count,
                regenerations = result.generation_attempts,
                "pipeline run finished"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

/// Turn the terminal state into the caller-facing result.
fn finish(state: PipelineState) -> PipelineResult {
    let response_type = state.response_type.unwrap_or(ResponseType::Fallback);
    let answering = response_type == ResponseType::Answer;
    debug!(?response_type, "building pipeline result");
    PipelineResult {
        answer: state.answer,
        citations: if answering { state.citations } else { Vec::new() },
        documents: if answering {
            state.relevant_documents
        } else {
            Vec::new()
        },
        response_type,
        clarification_options: state.clarification_options,
        grounding_verdict: state.grounding_verdict,
        confidence_score: if answering { state.confidence_score } else { 0.0 },
        searched_collections: state.searched_collections,
        retry_count: state.retry_count,
        generation_attempts: state.generation_attempts,
        query_rewrites: state.query_rewrites,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediquery_core::{CitationRef, CollectionId, Document, GroundingVerdict};
    use std::collections::HashMap;

    fn doc(id: &str, score: f32) -> Document {
        Document {
            id: id.to_string(),
            collection: CollectionId::from("general"),
            text: format!("content {id}"),
            source_label: format!("{id}.pdf p.1"),
            relevance_score: score,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_finish_answer_carries_documents_and_citations() {
        let allowed: BTreeSet<CollectionId> = [CollectionId::from("general")].into_iter().collect();
        let mut state = PipelineState::new("q", Role::Doctor, allowed);
        state.relevant_documents = vec![doc("a", 0.9)];
        state.citations = vec![CitationRef {
            marker: 1,
            document_id: "a".into(),
        }];
        state.answer = "grounded [Ref 1]".into();
        state.confidence_score = 0.9;
        state.response_type = Some(ResponseType::Answer);

        let result = finish(state);
        assert_eq!(result.documents.len(), 1);
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.confidence_score, 0.9);
    }

    #[test]
    fn test_finish_fallback_strips_evidence() {
        let allowed: BTreeSet<CollectionId> = [CollectionId::from("general")].into_iter().collect();
        let mut state = PipelineState::new("q", Role::Doctor, allowed);
        state.relevant_documents = vec![doc("a", 0.9)];
        state.answer = FALLBACK_ANSWER.into();
        state.response_type = Some(ResponseType::Fallback);

        let result = finish(state);
        assert!(result.documents.is_empty());
        assert!(result.citations.is_empty());
        assert_eq!(result.confidence_score, 0.0);
        assert_eq!(result.grounding_verdict, GroundingVerdict::Grounded);
    }
}
