//! # Mediquery Pipeline
//!
//! The stateful retrieval-and-verification pipeline: a bounded-retry state
//! machine that decides whether a query needs clarification, fans the
//! query out across every access-scoped collection the caller may read,
//! grades retrieved material for relevance, rewrites and retries when
//! nothing relevant surfaces, generates a role-appropriate citation-bearing
//! answer, and verifies the answer is grounded before releasing it.
//!
//! ```text
//! clarify → retrieve → grade → generate → verify
//!    |          ↑        |                  |
//!    | (if      |        └─ transform ←─────┘
//!    |  ambiguous)            (no docs)   (unverified)
//!    ↓
//!   END
//! ```
//!
//! The entry point is [`Pipeline::run`]. Capability services (structured
//! judgments, per-collection search, answer generation) are supplied as
//! trait objects; [`llm::OpenAiServices`] implements the judgment and
//! generation traits against an OpenAI-compatible completion API.

pub mod llm;
pub mod orchestrator;
pub mod steps;

pub use orchestrator::{Pipeline, PipelineLimits, Stage};
