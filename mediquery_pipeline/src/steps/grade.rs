//! Relevance grader — binary per-document judgments between retrieval and
//! generation.
//!
//! Judgments are independent per document and run as parallel tasks joined
//! before the orchestrator proceeds. A failed judgment marks that document
//! not relevant: an incorrect inclusion risks an ungrounded clinical
//! claim, so grading fails closed.

use std::sync::Arc;
use std::time::Instant;

use mediquery_core::{JudgmentService, PipelineState};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Grade every retrieved document against `state.current_query`, keeping
/// the relevant subset in retrieval order.
pub async fn grade_documents(state: &mut PipelineState, judge: Arc<dyn JudgmentService>) {
    let started = Instant::now();
    let total = state.retrieved_documents.len();
    let mut keep = vec![false; total];

    let mut tasks = JoinSet::new();
    for (index, document) in state.retrieved_documents.iter().cloned().enumerate() {
        let judge = Arc::clone(&judge);
        let query = state.current_query.clone();
        let role = state.actor_role;
        tasks.spawn(async move {
            let verdict = judge.grade_relevance(&query, role, &document).await;
            (index, document.source_label, verdict)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, label, Ok(judgment))) => {
                if judgment.relevant {
                    debug!(source = %label, "document relevant");
                    keep[index] = true;
                } else {
                    debug!(source = %label, reason = %judgment.reason, "document not relevant");
                }
            }
            Ok((_, label, Err(e))) => {
                warn!(source = %label, error = %e, "relevance judgment failed, dropping document");
            }
            Err(e) => warn!(error = %e, "relevance judgment task panicked, dropping document"),
        }
    }

    state.relevant_documents = state
        .retrieved_documents
        .iter()
        .zip(keep.iter())
        .filter(|(_, kept)| **kept)
        .map(|(doc, _)| doc.clone())
        .collect();

    debug!(
        kept = state.relevant_documents.len(),
        total,
        duration_us = started.elapsed().as_micros() as u64,
        "grading complete"
    );
}
