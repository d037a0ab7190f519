//! Clarification check — detects ambiguous clinical queries and surfaces
//! clarifying options before the expensive retrieval pipeline runs.
//!
//! Rather than guessing at "tell me about the policy", the pipeline
//! short-circuits with 2–4 specific follow-up questions for the caller to
//! choose from. A failed judgment call is non-fatal: the query is treated
//! as specific and the pipeline proceeds.

use mediquery_core::{JudgmentService, PipelineState, PromptProfile};
use tracing::{debug, info, warn};

/// Run the ambiguity judgment. Returns `true` when the query is ambiguous,
/// in which case `clarification_options` has been populated (truncated to
/// `max_options`) and the orchestrator should terminate without retrieval.
pub async fn clarification_check(
    state: &mut PipelineState,
    judge: &dyn JudgmentService,
    max_options: usize,
) -> bool {
    let profile = PromptProfile::for_role(state.actor_role);
    let collections: Vec<_> = state.allowed_collections.iter().cloned().collect();

    match judge
        .assess_ambiguity(&state.question, profile, &collections)
        .await
    {
        Ok(judgment) if judgment.ambiguous => {
            let mut options = judgment.options;
            options.truncate(max_options);
            info!(
                options = options.len(),
                "query is ambiguous, returning clarification options"
            );
            debug!(reasoning = %judgment.reasoning, "ambiguity reasoning");
            state.clarification_options = options;
            true
        }
        Ok(_) => {
            debug!("query is specific, proceeding to retrieval");
            false
        }
        Err(e) => {
            // Never block the pipeline on this check.
            warn!(error = %e, "clarification judgment failed, treating query as specific");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mediquery_core::{
        ClarificationJudgment, CollectionId, Document, GroundingJudgment, RelevanceJudgment, Role,
        ServiceError,
    };
    use std::collections::BTreeSet;

    struct FixedJudge {
        result: Result<ClarificationJudgment, ServiceError>,
    }

    #[async_trait]
    impl JudgmentService for FixedJudge {
        async fn assess_ambiguity(
            &self,
            _question: &str,
            _profile: PromptProfile,
            _collections: &[CollectionId],
        ) -> Result<ClarificationJudgment, ServiceError> {
            match &self.result {
                Ok(j) => Ok(j.clone()),
                Err(_) => Err(ServiceError::Timeout),
            }
        }

        async fn grade_relevance(
            &self,
            _query: &str,
            _role: Role,
            _document: &Document,
        ) -> Result<RelevanceJudgment, ServiceError> {
            unreachable!("not exercised")
        }

        async fn check_grounding(
            &self,
            _answer: &str,
            _documents: &[Document],
        ) -> Result<GroundingJudgment, ServiceError> {
            unreachable!("not exercised")
        }
    }

    fn state() -> PipelineState {
        let allowed: BTreeSet<CollectionId> = [CollectionId::from("general")].into_iter().collect();
        PipelineState::new("tell me about the policy", Role::Researcher, allowed)
    }

    #[tokio::test]
    async fn test_ambiguous_populates_options() {
        let judge = FixedJudge {
            result: Ok(ClarificationJudgment {
                ambiguous: true,
                options: vec![
                    "Which department's policy?".into(),
                    "Do you mean the visitor policy?".into(),
                ],
                reasoning: "no specific entity".into(),
            }),
        };
        let mut s = state();
        assert!(clarification_check(&mut s, &judge, 4).await);
        assert_eq!(s.clarification_options.len(), 2);
    }

    #[tokio::test]
    async fn test_options_truncated_to_max() {
        let judge = FixedJudge {
            result: Ok(ClarificationJudgment {
                ambiguous: true,
                options: (0..6).map(|i| format!("option {i}")).collect(),
                reasoning: String::new(),
            }),
        };
        let mut s = state();
        assert!(clarification_check(&mut s, &judge, 4).await);
        assert_eq!(s.clarification_options.len(), 4);
    }

    #[tokio::test]
    async fn test_specific_query_proceeds() {
        let judge = FixedJudge {
            result: Ok(ClarificationJudgment::default()),
        };
        let mut s = state();
        assert!(!clarification_check(&mut s, &judge, 4).await);
        assert!(s.clarification_options.is_empty());
    }

    #[tokio::test]
    async fn test_judgment_failure_is_fail_open() {
        let judge = FixedJudge {
            result: Err(ServiceError::Timeout),
        };
        let mut s = state();
        assert!(!clarification_check(&mut s, &judge, 4).await);
    }
}
