//! Query transformer — rewrites the query to improve recall when a
//! retrieval attempt produced nothing relevant.
//!
//! Zero-hit attempts broaden the query (expand abbreviations, add clinical
//! synonyms); attempts where hits came back but all were graded irrelevant
//! refocus the terminology instead. Each invocation consumes one retry
//! whether or not the rewrite itself succeeds, so a dead generation
//! service cannot loop the pipeline forever.

use mediquery_core::{AnswerGenerator, PipelineState, RewriteStrategy};
use tracing::{info, warn};

/// Rewrite `state.current_query` and increment the retry counter. The
/// original `question` is never mutated; every rewrite is appended to the
/// audit trail.
pub async fn transform_query(state: &mut PipelineState, generator: &dyn AnswerGenerator) {
    let strategy = if state.last_attempt_had_hits {
        RewriteStrategy::Refocus
    } else {
        RewriteStrategy::Broaden
    };

    match generator.rewrite_query(&state.current_query, strategy).await {
        Ok(rewritten) => {
            let rewritten = rewritten.trim().to_string();
            if rewritten.is_empty() || rewritten == state.current_query {
                warn!("rewrite returned an unchanged or empty query, keeping current query");
            } else {
                info!(
                    retry = state.retry_count + 1,
                    from = %state.current_query,
                    to = %rewritten,
                    ?strategy,
                    "query rewritten"
                );
                state.query_rewrites.push(rewritten.clone());
                state.current_query = rewritten;
            }
        }
        Err(e) => {
            warn!(error = %e, "query rewrite failed, retrying with current query");
        }
    }

    state.retry_count += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mediquery_core::{
        CollectionId, Document, GeneratedAnswer, PromptProfile, Role, ServiceError,
    };
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    struct ScriptedRewriter {
        reply: Result<String, ServiceError>,
        seen_strategy: Mutex<Option<RewriteStrategy>>,
    }

    #[async_trait]
    impl AnswerGenerator for ScriptedRewriter {
        async fn generate(
            &self,
            _profile: PromptProfile,
            _query: &str,
            _documents: &[Document],
            _tighten: bool,
        ) -> Result<GeneratedAnswer, ServiceError> {
            unreachable!("not exercised")
        }

        async fn rewrite_query(
            &self,
            _query: &str,
            strategy: RewriteStrategy,
        ) -> Result<String, ServiceError> {
            *self.seen_strategy.lock().unwrap() = Some(strategy);
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(ServiceError::Unavailable("down".into())),
            }
        }
    }

    fn state() -> PipelineState {
        let allowed: BTreeSet<CollectionId> = [CollectionId::from("general")].into_iter().collect();
        PipelineState::new("BP meds protocol", Role::Doctor, allowed)
    }

    #[tokio::test]
    async fn test_rewrite_updates_query_and_audit_trail() {
        let generator = ScriptedRewriter {
            reply: Ok("blood pressure medication protocol".into()),
            seen_strategy: Mutex::new(None),
        };
        let mut s = state();
        transform_query(&mut s, &generator).await;

        assert_eq!(s.current_query, "blood pressure medication protocol");
        assert_eq!(s.question, "BP meds protocol", "original question untouched");
        assert_eq!(s.query_rewrites, vec!["blood pressure medication protocol"]);
        assert_eq!(s.retry_count, 1);
    }

    #[tokio::test]
    async fn test_zero_hits_broadens() {
        let generator = ScriptedRewriter {
            reply: Ok("wider query".into()),
            seen_strategy: Mutex::new(None),
        };
        let mut s = state();
        s.last_attempt_had_hits = false;
        transform_query(&mut s, &generator).await;
        assert_eq!(
            *generator.seen_strategy.lock().unwrap(),
            Some(RewriteStrategy::Broaden)
        );
    }

    #[tokio::test]
    async fn test_all_irrelevant_refocuses() {
        let generator = ScriptedRewriter {
            reply: Ok("sharper query".into()),
            seen_strategy: Mutex::new(None),
        };
        let mut s = state();
        s.last_attempt_had_hits = true;
        transform_query(&mut s, &generator).await;
        assert_eq!(
            *generator.seen_strategy.lock().unwrap(),
            Some(RewriteStrategy::Refocus)
        );
    }

    #[tokio::test]
    async fn test_failed_rewrite_still_consumes_retry() {
        let generator = ScriptedRewriter {
            reply: Err(ServiceError::Unavailable("down".into())),
            seen_strategy: Mutex::new(None),
        };
        let mut s = state();
        transform_query(&mut s, &generator).await;

        assert_eq!(s.current_query, "BP meds protocol");
        assert!(s.query_rewrites.is_empty());
        assert_eq!(s.retry_count, 1);
    }
}
