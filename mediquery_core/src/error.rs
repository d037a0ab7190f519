//! Typed errors for the capability services.

use thiserror::Error;

/// Failure of a capability call (judgment, search, or generation).
///
/// The variants are deliberately distinguishable so each pipeline step can
/// apply its own conservative default: a timed-out clarification check is
/// treated as "not ambiguous", a malformed relevance judgment as "not
/// relevant", a failed grounding check as "not grounded".
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The call did not complete within its deadline.
    #[error("capability call timed out")]
    Timeout,

    /// The capability could not be reached or answered with a server error.
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    /// A structured judgment came back unparseable against its schema.
    #[error("malformed structured output: {0}")]
    MalformedSchema(String),

    /// The capability explicitly refused to answer.
    #[error("capability refused the request: {0}")]
    Refused(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_distinguishes_variants() {
        assert_eq!(ServiceError::Timeout.to_string(), "capability call timed out");
        assert!(ServiceError::Unavailable("503".into())
            .to_string()
            .contains("503"));
        assert!(ServiceError::MalformedSchema("not json".into())
            .to_string()
            .contains("not json"));
    }
}
