//! Capability traits the pipeline depends on.
//!
//! Three narrow, independently replaceable interfaces:
//! - [`JudgmentService`] — schema-constrained structured judgments
//!   (ambiguity, per-document relevance, grounding).
//! - [`CollectionSearch`] — nearest-neighbor search scoped to exactly one
//!   collection. The service enforces no access control of its own;
//!   scoping is the pipeline's responsibility.
//! - [`AnswerGenerator`] — role-profiled answer generation and query
//!   rewriting.
//!
//! In production these are backed by an OpenAI-compatible completion API
//! and a vector store; in tests, lightweight mocks are substituted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::profile::PromptProfile;
use crate::types::{CollectionId, Document, Role, SearchHit};

/// Output of the ambiguity detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClarificationJudgment {
    /// True if the query lacks enough specificity to retrieve a useful answer.
    pub ambiguous: bool,
    /// 2–4 specific, ready-to-send follow-up questions. Empty when not ambiguous.
    #[serde(default)]
    pub options: Vec<String>,
    /// Brief internal reasoning, kept for logs only.
    #[serde(default)]
    pub reasoning: String,
}

/// Binary relevance judgment for a single retrieved document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceJudgment {
    pub relevant: bool,
    #[serde(default)]
    pub reason: String,
}

/// Aggregate grounding judgment over a generated answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundingJudgment {
    /// True only if every checked claim is supported by the documents.
    pub grounded: bool,
    /// Claims the verifier could not support, for logs and regeneration hints.
    #[serde(default)]
    pub unsupported_claims: Vec<String>,
}

/// Schema-constrained structured judgments.
#[async_trait]
pub trait JudgmentService: Send + Sync {
    /// Decide whether `question` is specific enough to answer, and if not,
    /// propose clarifying options.
    async fn assess_ambiguity(
        &self,
        question: &str,
        profile: PromptProfile,
        collections: &[CollectionId],
    ) -> Result<ClarificationJudgment, ServiceError>;

    /// Judge whether one retrieved document is relevant to the query.
    /// Clinical terminology, ICD/CPT-style codes, and drug-name matches
    /// weigh toward relevant even with low lexical overlap.
    async fn grade_relevance(
        &self,
        query: &str,
        role: Role,
        document: &Document,
    ) -> Result<RelevanceJudgment, ServiceError>;

    /// Judge whether every claim in `answer` is supported by `documents`.
    async fn check_grounding(
        &self,
        answer: &str,
        documents: &[Document],
    ) -> Result<GroundingJudgment, ServiceError>;
}

/// Which convention the search backend's semantic scores use.
///
/// Distances are converted to similarities at the adapter boundary
/// (`similarity = 1 − normalized_distance`) so everything downstream works
/// in `[0, 1]`, higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreConvention {
    /// Scores are similarities in `[0, 1]`, higher is better.
    Similarity,
    /// Scores are normalized distances in `[0, 1]`, lower is better.
    Distance,
}

/// Nearest-neighbor search over exactly one collection.
#[async_trait]
pub trait CollectionSearch: Send + Sync {
    /// Search a single collection, returning up to `top_k` hits with raw
    /// semantic and lexical scores.
    async fn search(
        &self,
        collection: &CollectionId,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ServiceError>;

    /// The convention of the returned `semantic_score`s.
    fn score_convention(&self) -> ScoreConvention {
        ScoreConvention::Similarity
    }
}

/// Answer text plus the 1-based references it cites.
#[derive(Debug, Clone, Default)]
pub struct GeneratedAnswer {
    /// Answer text with inline `[Ref N]` markers.
    pub text: String,
    /// Cited references in first-use order, 1-based into the supplied
    /// document sequence.
    pub cited: Vec<usize>,
}

/// Why the previous retrieval attempt failed, steering the rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStrategy {
    /// No hits at all: broaden the query, expand abbreviations, add synonyms.
    Broaden,
    /// Hits came back but none were relevant: keep the clinical intent but
    /// sharpen the terminology toward the actual subject.
    Refocus,
}

/// Role-profiled text generation and query rewriting.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Generate a citation-bearing answer from the supplied documents.
    ///
    /// `tighten` is set when regenerating after a failed grounding check
    /// and instructs the generator to drop any claim the documents do not
    /// directly support.
    async fn generate(
        &self,
        profile: PromptProfile,
        query: &str,
        documents: &[Document],
        tighten: bool,
    ) -> Result<GeneratedAnswer, ServiceError>;

    /// Rewrite the query to improve recall. Must not change clinical intent.
    async fn rewrite_query(
        &self,
        query: &str,
        strategy: RewriteStrategy,
    ) -> Result<String, ServiceError>;
}
