//! Classifier: combines the two evaluator verdicts into one final status.
//!
//! The precedence policy is fixed, not configurable:
//! 1. Either verdict is `error` -> flagged for review
//! 2. Technical `fail` -> rejected (technical failures are authoritative)
//! 3. Medical `fail` -> rejected
//! 4. Both `pass` -> approved

use crate::types::{
    reason, ClassifiedClaim, EvaluationResult, FinalStatus, Verdict,
};

/// Combines evaluation results under the fixed precedence policy.
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one claim from its two evaluation results.
    ///
    /// Both results must belong to the same claim; the technical result's
    /// claim id is authoritative.
    pub fn classify(
        &self,
        technical: EvaluationResult,
        medical: EvaluationResult,
    ) -> ClassifiedClaim {
        debug_assert_eq!(technical.claim_id, medical.claim_id);
        let claim_id = technical.claim_id.clone();

        let (final_status, error_category) =
            match (technical.verdict, medical.verdict) {
                (Verdict::Error, _) | (_, Verdict::Error) => (
                    FinalStatus::FlaggedForReview,
                    reason::EVALUATION_ERROR.to_string(),
                ),
                // A medical pass never overrides an objective technical
                // failure. When both fail, the technical reason wins and the
                // medical reason stays visible in the medical result.
                (Verdict::Fail, _) => {
                    (FinalStatus::Rejected, technical.reason_code.clone())
                }
                (Verdict::Pass, Verdict::Fail) => {
                    (FinalStatus::Rejected, medical.reason_code.clone())
                }
                (Verdict::Pass, Verdict::Pass) => {
                    (FinalStatus::Approved, reason::NO_ERROR.to_string())
                }
            };

        let recommendation = recommend(final_status, &error_category);

        ClassifiedClaim {
            claim_id,
            final_status,
            error_category,
            recommendation,
            technical,
            medical,
            paid_amount: None,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Actionable recommendation text for a classification.
fn recommend(status: FinalStatus, category: &str) -> String {
    let text = match status {
        FinalStatus::Approved => "No action required",
        FinalStatus::FlaggedForReview => "Manual review required",
        FinalStatus::Rejected => match category {
            "T-AMOUNT" => "Review payment amount against policy limits",
            "T-APPROVAL" => "Verify approval number format and validity",
            "T-ENCOUNTER" => "Confirm encounter type is covered by the policy",
            c if c.starts_with("T-REQ-") => "Complete missing required fields",
            c if c.starts_with("M-") => "Consult medical guidelines for service necessity",
            _ => "Manual review required",
        },
    };
    text.to_string()
}
