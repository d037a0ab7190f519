//! # Mediquery Core
//!
//! Core types, capability traits, and ranking primitives for the mediquery
//! retrieval-and-verification pipeline.
//!
//! This crate defines the shared abstractions the pipeline crate is built
//! on: the access-scoped document model, the mutable [`PipelineState`]
//! threaded through every step, the role-to-prompt-profile table, and the
//! three replaceable capability traits ([`JudgmentService`],
//! [`CollectionSearch`], [`AnswerGenerator`]) behind which embedding,
//! nearest-neighbor search, and text generation live.

pub mod error;
pub mod profile;
pub mod ranking;
pub mod services;
pub mod types;

pub use error::ServiceError;
pub use profile::{CitationStrictness, DetailLevel, PromptProfile};
pub use ranking::{blend_score, clamp_unit, merge_ranked, to_similarity, RankingWeights};
pub use services::{
    AnswerGenerator, ClarificationJudgment, CollectionSearch, GeneratedAnswer,
    GroundingJudgment, JudgmentService, RelevanceJudgment, RewriteStrategy, ScoreConvention,
};
pub use types::*;
