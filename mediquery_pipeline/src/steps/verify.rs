//! Grounding verifier and confidence scorer — the post-generation gate.
//!
//! Verification asks an independent judgment whether every claim in the
//! answer is supported by the relevant documents. Unlike the clarification
//! check, a failed judgment here fails closed: an unverifiable clinical
//! answer is treated as not grounded and sent back for regeneration (or
//! released flagged once regenerations are exhausted).

use mediquery_core::{JudgmentService, PipelineState};
use tracing::{debug, warn};

/// Check the current answer against the relevant documents. Returns `true`
/// when every claim is supported. An empty answer has nothing to verify
/// and passes trivially.
pub async fn verify_grounding(state: &PipelineState, judge: &dyn JudgmentService) -> bool {
    if state.answer.trim().is_empty() {
        return true;
    }

    match judge
        .check_grounding(&state.answer, &state.relevant_documents)
        .await
    {
        Ok(judgment) => {
            if judgment.grounded {
                debug!("answer is grounded");
            } else {
                warn!(
                    unsupported = judgment.unsupported_claims.len(),
                    claims = ?judgment.unsupported_claims,
                    "answer contains unsupported claims"
                );
            }
            judgment.grounded
        }
        Err(e) => {
            warn!(error = %e, "grounding judgment failed, treating answer as not grounded");
            false
        }
    }
}

/// Mean relevance of the strongest evidence behind the answer, in `[0, 1]`.
///
/// Averages the top three cited documents by blended score; when fewer than
/// three citations resolved, falls back to the top three relevant documents
/// so a tersely cited answer is not penalized for brevity.
pub fn confidence_score(state: &PipelineState) -> f32 {
    let mut scores: Vec<f32> = state
        .citations
        .iter()
        .filter_map(|c| state.relevant_document(&c.document_id))
        .map(|d| d.relevance_score)
        .collect();
    if scores.len() < 3 {
        scores = state
            .relevant_documents
            .iter()
            .map(|d| d.relevance_score)
            .collect();
    }
    if scores.is_empty() {
        return 0.0;
    }

    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    scores.truncate(3);
    let mean = scores.iter().sum::<f32>() / scores.len() as f32;
    mean.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mediquery_core::{
        CitationRef, ClarificationJudgment, CollectionId, Document, GroundingJudgment,
        PromptProfile, RelevanceJudgment, Role, ServiceError,
    };
    use std::collections::{BTreeSet, HashMap};

    struct FixedVerifier {
        result: Result<GroundingJudgment, ServiceError>,
    }

    #[async_trait]
    impl JudgmentService for FixedVerifier {
        async fn assess_ambiguity(
            &self,
            _question: &str,
            _profile: PromptProfile,
            _collections: &[CollectionId],
        ) -> Result<ClarificationJudgment, ServiceError> {
            unreachable!("not exercised")
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
            match &self.result {
                Ok(j) => Ok(j.clone()),
                Err(_) => Err(ServiceError::Timeout),
            }
        }
    }

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

    fn state() -> PipelineState {
        let allowed: BTreeSet<CollectionId> = [CollectionId::from("general")].into_iter().collect();
        PipelineState::new("heparin protocol", Role::Nurse, allowed)
    }

    #[tokio::test]
    async fn test_grounded_answer_passes() {
        let judge = FixedVerifier {
            result: Ok(GroundingJudgment {
                grounded: true,
                unsupported_claims: vec![],
            }),
        };
        let mut s = state();
        s.answer = "Administer per protocol [Ref 1].".into();
        assert!(verify_grounding(&s, &judge).await);
    }

    #[tokio::test]
    async fn test_unsupported_claims_fail() {
        let judge = FixedVerifier {
            result: Ok(GroundingJudgment {
                grounded: false,
                unsupported_claims: vec!["invented dosage".into()],
            }),
        };
        let mut s = state();
        s.answer = "Dosage is 50mg.".into();
        assert!(!verify_grounding(&s, &judge).await);
    }

    #[tokio::test]
    async fn test_verifier_failure_fails_closed() {
        let judge = FixedVerifier {
            result: Err(ServiceError::Timeout),
        };
        let mut s = state();
        s.answer = "Some claim.".into();
        assert!(!verify_grounding(&s, &judge).await);
    }

    #[tokio::test]
    async fn test_empty_answer_passes_trivially() {
        let judge = FixedVerifier {
            result: Err(ServiceError::Timeout),
        };
        let s = state();
        assert!(verify_grounding(&s, &judge).await);
    }

    #[test]
    fn test_confidence_averages_top_three_cited() {
        let mut s = state();
        s.relevant_documents = vec![
            doc("a", 0.9),
            doc("b", 0.8),
            doc("c", 0.7),
            doc("d", 0.1),
        ];
        s.citations = ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, id)| CitationRef {
                marker: i + 1,
                document_id: id.to_string(),
            })
            .collect();
        let score = confidence_score(&s);
        assert!((score - 0.8).abs() < 1e-6, "got {score}");
    }

    #[test]
    fn test_confidence_falls_back_to_relevant_documents() {
        let mut s = state();
        s.relevant_documents = vec![doc("a", 0.6), doc("b", 0.4), doc("c", 0.2)];
        s.citations = vec![CitationRef {
            marker: 1,
            document_id: "a".into(),
        }];
        let score = confidence_score(&s);
        assert!((score - 0.4).abs() < 1e-6, "got {score}");
    }

    #[test]
    fn test_confidence_zero_without_evidence() {
        let s = state();
        assert_eq!(confidence_score(&s), 0.0);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let mut s = state();
        // A backend bug can hand back scores above 1.0.
        s.relevant_documents = vec![doc("a", 1.4), doc("b", 1.2), doc("c", 1.1)];
        assert_eq!(confidence_score(&s), 1.0);
    }
}
