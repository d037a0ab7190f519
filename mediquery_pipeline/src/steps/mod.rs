//! The six pipeline steps.
//!
//! Each step is a free async function taking the mutable [`PipelineState`]
//! plus the capability services it needs, so steps stay independently
//! testable and the orchestrator stays pure routing.
//!
//! [`PipelineState`]: mediquery_core::PipelineState

mod clarify;
mod generate;
mod grade;
mod retrieve;
mod transform;
mod verify;

pub use clarify::clarification_check;
pub use generate::generate_answer;
pub use grade::grade_documents;
pub use retrieve::retrieve;
pub use transform::transform_query;
pub use verify::{confidence_score, verify_grounding};
