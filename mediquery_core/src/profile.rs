//! Role-conditioned prompt profiles.
//!
//! A small table mapping each [`Role`] to a [`PromptProfile`] consulted by
//! the answer generator and the clarification check, instead of scattering
//! role checks through generation logic.

use serde::{Deserialize, Serialize};

use crate::types::Role;

/// How much clinical detail the generated answer may carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Complete administrative and clinical detail.
    Full,
    /// Care protocols, dosing guidelines, patient management.
    Operational,
    /// Technical procedures and safety protocols.
    Technical,
    /// Aggregate data and policy patterns only.
    Aggregate,
    /// High-level policy summaries only.
    Summary,
}

/// How strictly every sentence must be backed by a citation marker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CitationStrictness {
    /// Every factual sentence carries at least one marker.
    Standard,
    /// Additionally refuse any statement the citations do not fully cover.
    Strict,
}

/// Prompt-shaping parameters derived from the actor role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptProfile {
    pub detail_level: DetailLevel,
    /// Strip protected identifiers from the generated answer.
    pub deidentify: bool,
    pub citation_strictness: CitationStrictness,
}

impl PromptProfile {
    /// The profile table. Doctors and admins get full detail and may see
    /// protected-but-authorized identifiers; researchers and viewers get
    /// de-identified output.
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Admin => Self {
                detail_level: DetailLevel::Full,
                deidentify: false,
                citation_strictness: CitationStrictness::Standard,
            },
            Role::Doctor => Self {
                detail_level: DetailLevel::Full,
                deidentify: false,
                citation_strictness: CitationStrictness::Standard,
            },
            Role::Nurse => Self {
                detail_level: DetailLevel::Operational,
                deidentify: false,
                citation_strictness: CitationStrictness::Standard,
            },
            Role::Technician => Self {
                detail_level: DetailLevel::Technical,
                deidentify: true,
                citation_strictness: CitationStrictness::Standard,
            },
            Role::Researcher => Self {
                detail_level: DetailLevel::Aggregate,
                deidentify: true,
                citation_strictness: CitationStrictness::Strict,
            },
            Role::Viewer => Self {
                detail_level: DetailLevel::Summary,
                deidentify: true,
                citation_strictness: CitationStrictness::Strict,
            },
        }
    }

    /// Render the audience line injected into the generation prompt.
    pub fn audience_instruction(&self) -> &'static str {
        match self.detail_level {
            DetailLevel::Full => {
                "You are responding to clinical or administrative staff with full access. \
                 Provide complete procedure and policy detail."
            }
            DetailLevel::Operational => {
                "You are responding to nursing staff. Focus on care protocols, dosing \
                 guidelines, and patient management procedures."
            }
            DetailLevel::Technical => {
                "You are responding to a lab/radiology technician. Focus on technical \
                 procedures and safety protocols."
            }
            DetailLevel::Aggregate => {
                "You are responding to a researcher. Focus on aggregate data and policy \
                 patterns."
            }
            DetailLevel::Summary => {
                "You are responding to a general staff member. Provide only high-level \
                 policy summaries."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_role_has_a_profile() {
        let roles = [
            Role::Admin,
            Role::Doctor,
            Role::Nurse,
            Role::Technician,
            Role::Researcher,
            Role::Viewer,
        ];
        for role in roles {
            // audience_instruction must be non-empty for every profile
            assert!(!PromptProfile::for_role(role).audience_instruction().is_empty());
        }
    }

    #[test]
    fn test_researcher_and_viewer_are_deidentified() {
        assert!(PromptProfile::for_role(Role::Researcher).deidentify);
        assert!(PromptProfile::for_role(Role::Viewer).deidentify);
        assert!(!PromptProfile::for_role(Role::Doctor).deidentify);
    }

    #[test]
    fn test_doctor_gets_full_detail() {
        assert_eq!(
            PromptProfile::for_role(Role::Doctor).detail_level,
            DetailLevel::Full
        );
    }
}
