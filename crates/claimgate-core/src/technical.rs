//! Deterministic technical evaluation of a claim against structured rules.
//!
//! Rules apply in rule-set order and the first failing rule wins: technical
//! failures are mutually exclusive causes in this domain, so accumulating
//! them adds noise without changing the outcome.

use chrono::NaiveDate;

use crate::types::{
    reason, ClaimField, ClaimRecord, EvaluationResult, EvaluatorKind, RuleCondition, RuleSet,
    TechnicalCheck,
};

/// Evaluates claims against the technical rule set. Same input always
/// produces the same output; no I/O, no clock.
pub struct TechnicalEvaluator;

impl TechnicalEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one claim. Returns `pass` when no rule fails, `fail` with the
    /// first failing rule's id as reason code, or `error` when a claim field
    /// cannot be parsed.
    pub fn evaluate(&self, claim: &ClaimRecord, rules: &RuleSet) -> EvaluationResult {
        if rules.is_empty() {
            return EvaluationResult::pass(
                &claim.claim_id,
                EvaluatorKind::Technical,
                reason::NO_TECHNICAL_RULES,
            );
        }

        // Malformed numeric/date fields are reported, never panicked on.
        let paid_amount = match parse_paid_amount(claim) {
            Ok(v) => v,
            Err(result) => return result,
        };
        if let Err(result) = parse_service_date(claim) {
            return result;
        }

        for rule in &rules.rules {
            let RuleCondition::Structured(check) = &rule.condition else {
                // Narrative rules in a technical set are extraction noise.
                continue;
            };

            if let Some(detail) = check_violation(claim, paid_amount, check) {
                tracing::debug!(
                    claim_id = %claim.claim_id,
                    rule_id = %rule.rule_id,
                    "technical rule failed"
                );
                return EvaluationResult::fail(
                    &claim.claim_id,
                    EvaluatorKind::Technical,
                    &rule.rule_id,
                    detail,
                );
            }
        }

        EvaluationResult::pass(&claim.claim_id, EvaluatorKind::Technical, reason::OK)
    }
}

impl Default for TechnicalEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_paid_amount(claim: &ClaimRecord) -> Result<Option<f64>, EvaluationResult> {
    let Some(raw) = claim.field(ClaimField::PaidAmount) else {
        return Ok(None);
    };
    raw.trim().parse::<f64>().map(Some).map_err(|_| {
        malformed(claim, ClaimField::PaidAmount, raw)
    })
}

fn parse_service_date(claim: &ClaimRecord) -> Result<Option<NaiveDate>, EvaluationResult> {
    let Some(raw) = claim.field(ClaimField::ServiceDate) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(Some)
        .map_err(|_| malformed(claim, ClaimField::ServiceDate, raw))
}

fn malformed(claim: &ClaimRecord, field: ClaimField, raw: &str) -> EvaluationResult {
    EvaluationResult::error(
        &claim.claim_id,
        EvaluatorKind::Technical,
        reason::malformed_field(field),
        format!("field {field} has unparsable value '{raw}'"),
    )
}

/// Returns a violation detail when the check fails, `None` when it holds.
fn check_violation(
    claim: &ClaimRecord,
    paid_amount: Option<f64>,
    check: &TechnicalCheck,
) -> Option<String> {
    match check {
        TechnicalCheck::PaidAmountThreshold { max } => {
            let amount = paid_amount?;
            (amount > *max)
                .then(|| format!("paid amount {amount} exceeds threshold {max}"))
        }
        TechnicalCheck::ApprovalNumberMinLength { min_digits } => {
            let raw = claim.field(ClaimField::ApprovalNumber)?;
            let digits = raw.chars().filter(char::is_ascii_digit).count();
            (digits < *min_digits).then(|| {
                format!(
                    "approval number '{raw}' has {digits} digits, minimum is {min_digits}"
                )
            })
        }
        TechnicalCheck::RequiredField { field } => {
            if claim.field(*field).is_none() {
                Some(format!("required field {field} is missing or empty"))
            } else {
                None
            }
        }
        TechnicalCheck::AllowedEncounterTypes { allowed } => {
            let value = claim.field(ClaimField::EncounterType)?;
            let normalized = value.trim().to_ascii_lowercase();
            (!allowed.iter().any(|a| a == &normalized)).then(|| {
                format!("encounter type '{value}' is not in the allowed set")
            })
        }
    }
}
