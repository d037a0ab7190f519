//! Hybrid score blending and deterministic merge ranking.
//!
//! A collection search combines dense semantic similarity and lexical
//! term overlap into one blended relevance score per hit. Merging across
//! collections sorts by blended score descending, breaking ties by shorter
//! source label and then collection id, so a fixed set of per-collection
//! hits always produces the identical ranked sequence.

use std::cmp::Ordering;

use crate::services::ScoreConvention;
use crate::types::{CollectionId, Document, SearchHit};

/// Weights for the blended relevance score. Defaults to 0.7 semantic /
/// 0.3 lexical.
#[derive(Debug, Clone, Copy)]
pub struct RankingWeights {
    pub semantic: f32,
    pub lexical: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            lexical: 0.3,
        }
    }
}

/// Clamp a score into `[0, 1]`.
pub fn clamp_unit(score: f32) -> f32 {
    score.clamp(0.0, 1.0)
}

/// Convert a raw semantic score into a similarity in `[0, 1]`.
///
/// Distance-convention backends report normalized distances, lower is
/// better; those are converted with `similarity = 1 − distance`. Raw
/// distances are never averaged or blended directly.
pub fn to_similarity(raw: f32, convention: ScoreConvention) -> f32 {
    match convention {
        ScoreConvention::Similarity => clamp_unit(raw),
        ScoreConvention::Distance => clamp_unit(1.0 - clamp_unit(raw)),
    }
}

/// Blend semantic similarity and lexical overlap into one relevance score.
pub fn blend_score(hit: &SearchHit, weights: RankingWeights, convention: ScoreConvention) -> f32 {
    let semantic = to_similarity(hit.semantic_score, convention);
    let lexical = clamp_unit(hit.lexical_score);
    clamp_unit(semantic * weights.semantic + lexical * weights.lexical)
}

/// Merge per-collection hit lists into one ranked, truncated sequence.
///
/// `per_collection` must be supplied in a deterministic order (the caller
/// iterates its allowed-collection set); each document's `relevance_score`
/// is set to the blended score. Ordering: blended score descending, then
/// shorter source label, then collection id.
pub fn merge_ranked(
    per_collection: impl IntoIterator<Item = (CollectionId, Vec<SearchHit>)>,
    weights: RankingWeights,
    convention: ScoreConvention,
    top_k: usize,
) -> Vec<Document> {
    let mut merged: Vec<Document> = Vec::new();
    for (_collection, hits) in per_collection {
        for hit in hits {
            let score = blend_score(&hit, weights, convention);
            let mut document = hit.document;
            document.relevance_score = score;
            merged.push(document);
        }
    }

    merged.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.source_label.len().cmp(&b.source_label.len()))
            .then_with(|| a.collection.cmp(&b.collection))
    });
    merged.truncate(top_k);
    merged
}
