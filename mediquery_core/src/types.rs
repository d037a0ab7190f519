//! Core data types for the mediquery pipeline.
//!
//! Defines the access-scoped document model and the single mutable
//! [`PipelineState`] record that flows through every pipeline step. One
//! state is created per incoming question, lives for exactly one run, and
//! is never shared between concurrent requests.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Actor role attached to an incoming question.
///
/// Roles condition generation detail and de-identification via the
/// [`PromptProfile`](crate::profile::PromptProfile) table; they never grant
/// collection access by themselves — access arrives as an explicit set of
/// readable collections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full administrative access.
    Admin,
    /// Licensed physician: full clinical detail.
    Doctor,
    /// Nursing staff: care protocols and dosing focus.
    Nurse,
    /// Lab/radiology technician: technical procedure focus.
    Technician,
    /// Researcher: de-identified, aggregate-oriented output.
    Researcher,
    /// General staff: high-level summaries only.
    Viewer,
}

/// Identifier of an access-scoped document collection (one per department).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct CollectionId(pub String);

impl CollectionId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A retrieved evidence unit.
///
/// Immutable once retrieved; owned exclusively by the [`PipelineState`]
/// that retrieved it. `relevance_score` is the blended similarity in
/// `[0, 1]` assigned at merge time (higher is better).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identifier of the chunk within its collection.
    pub id: String,
    /// Collection this document was retrieved from.
    pub collection: CollectionId,
    /// The evidence text.
    pub text: String,
    /// Human-readable provenance: filename plus page/sheet.
    pub source_label: String,
    /// Blended relevance score in `[0, 1]`, higher is better.
    pub relevance_score: f32,
    /// Free-form source metadata (department, modality, page, ...).
    pub metadata: HashMap<String, String>,
}

/// A single hit returned by a collection search, before score blending.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The retrieved document (with `relevance_score` not yet assigned).
    pub document: Document,
    /// Dense semantic score, in the convention declared by the search service.
    pub semantic_score: f32,
    /// Lexical term-overlap score in `[0, 1]`, higher is better.
    pub lexical_score: f32,
}

/// Binds a 1-based citation marker in the answer text to a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CitationRef {
    /// Marker index as it appears in the answer text (`[Ref 1]` → 1).
    pub marker: usize,
    /// Identifier of the cited document in `relevant_documents`.
    pub document_id: String,
}

/// Verdict of the grounding verifier.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroundingVerdict {
    /// Every checked claim is supported by retrieved text.
    #[default]
    Grounded,
    /// At least one claim could not be verified; released with a warning.
    Unverified,
}

/// What the caller should render for a terminal pipeline state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// A citation-bearing answer.
    Answer,
    /// Clarifying options instead of a guess.
    Clarification,
    /// Graceful "no grounded information found" terminal state.
    Fallback,
}

/// The single mutable record threaded through every pipeline step.
///
/// Created once per incoming question, driven through the orchestrator for
/// exactly one run, then turned into a [`PipelineResult`] and discarded.
#[derive(Debug, Clone)]
pub struct PipelineState {
    /// Original question; immutable after creation.
    pub question: String,
    /// Possibly rewritten query; mutated only by the query transformer.
    pub current_query: String,
    /// Immutable actor role.
    pub actor_role: Role,
    /// Collections this run may read. Ordered for deterministic fan-out.
    pub allowed_collections: BTreeSet<CollectionId>,
    /// Collections that returned at least one hit, in first-observed order.
    pub searched_collections: Vec<CollectionId>,
    /// Hits of the latest retrieval attempt; replaced wholesale, never appended.
    pub retrieved_documents: Vec<Document>,
    /// Subset of `retrieved_documents` surviving relevance grading.
    pub relevant_documents: Vec<Document>,
    /// Whether the latest retrieval attempt returned any hits at all.
    /// Distinguishes zero-hit from all-irrelevant when picking a rewrite strategy.
    pub last_attempt_had_hits: bool,
    /// Query-rewrite retries consumed; incremented only by the transform step.
    pub retry_count: u32,
    /// Regenerations consumed after failed grounding checks.
    pub generation_attempts: u32,
    /// The released answer text (empty until generation).
    pub answer: String,
    /// Citation markers bound to documents in `relevant_documents`.
    pub citations: Vec<CitationRef>,
    /// Verdict of the grounding verifier.
    pub grounding_verdict: GroundingVerdict,
    /// Mean similarity of the top cited documents, clamped to `[0, 1]`.
    pub confidence_score: f32,
    /// Terminal rendering decision; `None` while the run is in flight.
    pub response_type: Option<ResponseType>,
    /// Clarifying options; only meaningful for clarification responses.
    pub clarification_options: Vec<String>,
    /// Audit trail of every query rewrite, in order.
    pub query_rewrites: Vec<String>,
}

impl PipelineState {
    /// Create the state for one question/answer exchange.
    pub fn new(question: impl Into<String>, role: Role, allowed: BTreeSet<CollectionId>) -> Self {
        let question = question.into();
        Self {
            current_query: question.clone(),
            question,
            actor_role: role,
            allowed_collections: allowed,
            searched_collections: Vec::new(),
            retrieved_documents: Vec::new(),
            relevant_documents: Vec::new(),
            last_attempt_had_hits: false,
            retry_count: 0,
            generation_attempts: 0,
            answer: String::new(),
            citations: Vec::new(),
            grounding_verdict: GroundingVerdict::default(),
            confidence_score: 0.0,
            response_type: None,
            clarification_options: Vec::new(),
            query_rewrites: Vec::new(),
        }
    }

    /// Look up a relevant document by id.
    pub fn relevant_document(&self, id: &str) -> Option<&Document> {
        self.relevant_documents.iter().find(|d| d.id == id)
    }

    /// True when every citation marker is unique and resolves into
    /// `relevant_documents`.
    pub fn citations_resolve(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.citations.iter().all(|c| {
            seen.insert(c.marker) && self.relevant_document(&c.document_id).is_some()
        })
    }
}

/// Caller-facing mirror of the terminal [`PipelineState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// The released answer, clarification preamble, or fallback message.
    pub answer: String,
    /// Citation markers bound to documents in `documents`.
    pub citations: Vec<CitationRef>,
    /// The relevant documents backing the answer (empty for clarification/fallback).
    pub documents: Vec<Document>,
    /// What the caller should render.
    pub response_type: ResponseType,
    /// Clarifying options (only for clarification responses).
    pub clarification_options: Vec<String>,
    /// Grounding verdict of the released answer.
    pub grounding_verdict: GroundingVerdict,
    /// Mean similarity of the top cited documents, in `[0, 1]`.
    pub confidence_score: f32,
    /// Collections that contributed at least one hit, for audit/display.
    pub searched_collections: Vec<CollectionId>,
    /// Query-rewrite retries consumed.
    pub retry_count: u32,
    /// Answer regenerations consumed.
    pub generation_attempts: u32,
    /// Audit trail of query rewrites.
    pub query_rewrites: Vec<String>,
}

/// Intersect the caller's permitted collections with an optional
/// caller-supplied filter.
///
/// The filter can only narrow scope, never widen it; an empty result means
/// the caller asked exclusively for collections outside their permission.
pub fn scoped_collections(
    permitted: &BTreeSet<CollectionId>,
    requested: Option<&[CollectionId]>,
) -> BTreeSet<CollectionId> {
    match requested {
        Some(filter) => filter
            .iter()
            .filter(|c| permitted.contains(*c))
            .cloned()
            .collect(),
        None => permitted.clone(),
    }
}
