//! Fan-out retriever — scatter-gather hybrid search across every allowed
//! collection.
//!
//! One search task per collection, each bounded by its own timeout and
//! cancelled independently on expiry without cancelling siblings. Results
//! land in a per-collection arena keyed by collection id and are merged
//! after the join, so no accumulator is written concurrently. A collection
//! that times out or errors is skipped and logged; partial results from
//! the remaining collections still count.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mediquery_core::{
    merge_ranked, CollectionId, CollectionSearch, PipelineState, RankingWeights, SearchHit,
};
use mediquery_config::RetrievalConfig;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Run one retrieval attempt for `state.current_query`.
///
/// Replaces `retrieved_documents` wholesale and records, in deterministic
/// allowed-set order, which collections contributed at least one hit.
/// An attempt where every collection fails yields an empty sequence and
/// routes identically to "no relevant documents".
pub async fn retrieve(
    state: &mut PipelineState,
    search: Arc<dyn CollectionSearch>,
    config: &RetrievalConfig,
) {
    let started = Instant::now();
    let collection_count = state.allowed_collections.len();
    let limit = if config.max_concurrency == 0 {
        collection_count.max(1)
    } else {
        config.max_concurrency
    };
    let semaphore = Arc::new(Semaphore::new(limit));
    let timeout = Duration::from_millis(config.collection_timeout_ms);

    let mut tasks: JoinSet<(CollectionId, Option<Vec<SearchHit>>)> = JoinSet::new();
    for collection in state.allowed_collections.iter().cloned() {
        let search = Arc::clone(&search);
        let semaphore = Arc::clone(&semaphore);
        let query = state.current_query.clone();
        let top_k = config.top_k;
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            match tokio::time::timeout(timeout, search.search(&collection, &query, top_k)).await {
                Ok(Ok(hits)) => (collection, Some(hits)),
                Ok(Err(e)) => {
                    warn!(collection = %collection, error = %e, "collection search failed, skipping");
                    (collection, None)
                }
                Err(_) => {
                    warn!(collection = %collection, timeout_ms = timeout.as_millis() as u64,
                        "collection search timed out, skipping");
                    (collection, None)
                }
            }
        });
    }

    // Arena of per-collection results, merged only after the full join.
    let mut arena: BTreeMap<CollectionId, Vec<SearchHit>> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((collection, Some(hits))) if !hits.is_empty() => {
                arena.insert(collection, hits);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "collection search task panicked, skipping"),
        }
    }

    // The search service enforces no access control of its own; drop any
    // hit tagged with a collection outside the caller's scope.
    for (collection, hits) in arena.iter_mut() {
        let before = hits.len();
        hits.retain(|hit| state.allowed_collections.contains(&hit.document.collection));
        if hits.len() < before {
            warn!(
                collection = %collection,
                removed = before - hits.len(),
                "dropped hits tagged outside the allowed collection scope"
            );
        }
    }

    state.searched_collections = state
        .allowed_collections
        .iter()
        .filter(|c| arena.get(*c).is_some_and(|hits| !hits.is_empty()))
        .cloned()
        .collect();

    let weights = RankingWeights {
        semantic: config.semantic_weight,
        lexical: config.lexical_weight,
    };
    let convention = search.score_convention();
    let merged = merge_ranked(arena, weights, convention, config.top_k);

    state.last_attempt_had_hits = !merged.is_empty();
    state.retrieved_documents = merged;

    debug!(
        collections = collection_count,
        hits = state.retrieved_documents.len(),
        searched = state.searched_collections.len(),
        duration_us = started.elapsed().as_micros() as u64,
        "retrieval attempt complete"
    );
}
