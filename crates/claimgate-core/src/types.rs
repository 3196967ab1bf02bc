//! Core data model shared by the deterministic engine and the runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Which rule document a rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Deterministic, field-level constraints (thresholds, required fields).
    Technical,
    /// Natural-language clinical criteria evaluated via language model.
    Medical,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Technical => write!(f, "technical"),
            RuleKind::Medical => write!(f, "medical"),
        }
    }
}

/// Claim fields that rules may reference.
///
/// Rule documents name fields in free text; parsing through this enum rejects
/// unknown field names at extraction time instead of at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimField {
    ClaimId,
    EncounterType,
    ServiceDate,
    NationalId,
    MemberId,
    FacilityId,
    UniqueId,
    DiagnosisCodes,
    ServiceCode,
    PaidAmount,
    ApprovalNumber,
}

impl ClaimField {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimField::ClaimId => "claim_id",
            ClaimField::EncounterType => "encounter_type",
            ClaimField::ServiceDate => "service_date",
            ClaimField::NationalId => "national_id",
            ClaimField::MemberId => "member_id",
            ClaimField::FacilityId => "facility_id",
            ClaimField::UniqueId => "unique_id",
            ClaimField::DiagnosisCodes => "diagnosis_codes",
            ClaimField::ServiceCode => "service_code",
            ClaimField::PaidAmount => "paid_amount",
            ClaimField::ApprovalNumber => "approval_number",
        }
    }

    /// Parse a field name from rule-document text. Accepts the canonical
    /// name plus the aliases seen in real rule documents.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace([' ', '-', '.'], "_");
        match normalized.as_str() {
            "claim_id" => Some(ClaimField::ClaimId),
            "encounter_type" => Some(ClaimField::EncounterType),
            "service_date" => Some(ClaimField::ServiceDate),
            "national_id" => Some(ClaimField::NationalId),
            "member_id" => Some(ClaimField::MemberId),
            "facility_id" => Some(ClaimField::FacilityId),
            "unique_id" => Some(ClaimField::UniqueId),
            "diagnosis_codes" | "diagnosis" => Some(ClaimField::DiagnosisCodes),
            "service_code" => Some(ClaimField::ServiceCode),
            "paid_amount" | "paid_amount_aed" | "amount" => Some(ClaimField::PaidAmount),
            "approval_number" | "approval" => Some(ClaimField::ApprovalNumber),
            _ => None,
        }
    }
}

impl fmt::Display for ClaimField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured technical check extracted from a technical rule document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum TechnicalCheck {
    /// Paid amount must not exceed `max`.
    PaidAmountThreshold { max: f64 },
    /// Approval number must carry at least `min_digits` digits.
    ApprovalNumberMinLength { min_digits: usize },
    /// The named field must be present and non-empty.
    RequiredField { field: ClaimField },
    /// Encounter type must be one of the allowed values (lowercase).
    AllowedEncounterTypes { allowed: Vec<String> },
}

/// How a rule is expressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Machine-checkable condition (technical rules).
    Structured(TechnicalCheck),
    /// Natural-language excerpt delegated to the language model (medical rules).
    Narrative(String),
}

/// Severity of a rule violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Reject,
    Review,
}

/// One extracted rule. Immutable; identity is `(kind, rule_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub rule_id: String,
    pub kind: RuleKind,
    /// Field the rule constrains (technical) or the clinical topic it
    /// anchors on (medical).
    pub field_or_topic: String,
    pub condition: RuleCondition,
    pub severity: Severity,
    /// The document line the rule was extracted from, bounded in length.
    pub source_excerpt: String,
}

/// An ordered rule set for one tenant and kind.
///
/// Replaced wholesale on re-extraction, never mutated in place. Equality
/// ignores `extracted_at` so that re-extracting an unchanged document yields
/// an equal rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub kind: RuleKind,
    pub tenant_id: String,
    pub rules: Vec<RuleRecord>,
    pub extracted_at: DateTime<Utc>,
    /// Hex-encoded SHA-256 of the source document.
    pub source_checksum: String,
}

impl PartialEq for RuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.tenant_id == other.tenant_id
            && self.rules == other.rules
            && self.source_checksum == other.source_checksum
    }
}

impl RuleSet {
    pub fn new(
        kind: RuleKind,
        tenant_id: impl Into<String>,
        rules: Vec<RuleRecord>,
        source_checksum: String,
    ) -> Self {
        Self {
            kind,
            tenant_id: tenant_id.into(),
            rules,
            extracted_at: Utc::now(),
            source_checksum,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

/// One healthcare claim as normalized by the ingestion layer.
///
/// Numeric and date fields are carried as the raw strings the ingestion layer
/// produced; the evaluators parse them and report malformed values instead of
/// crashing on them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: String,
    pub encounter_type: Option<String>,
    pub service_date: Option<String>,
    pub national_id: Option<String>,
    pub member_id: Option<String>,
    pub facility_id: Option<String>,
    pub unique_id: Option<String>,
    pub diagnosis_codes: Option<String>,
    pub service_code: Option<String>,
    pub paid_amount: Option<String>,
    pub approval_number: Option<String>,
    /// Validation status from a prior run, if any.
    pub status: Option<String>,
    /// Error category from a prior run, if any.
    pub error_type: Option<String>,
    /// Recommendation from a prior run, if any.
    pub recommendation: Option<String>,
}

impl ClaimRecord {
    /// Generate a claim id when the source row lacked one.
    pub fn ensure_id(&mut self) {
        if self.claim_id.trim().is_empty() {
            self.claim_id = Uuid::new_v4().to_string();
        }
    }

    /// Raw string value of a rule-addressable field.
    pub fn field(&self, field: ClaimField) -> Option<&str> {
        let value = match field {
            ClaimField::ClaimId => {
                return if self.claim_id.is_empty() {
                    None
                } else {
                    Some(self.claim_id.as_str())
                }
            }
            ClaimField::EncounterType => &self.encounter_type,
            ClaimField::ServiceDate => &self.service_date,
            ClaimField::NationalId => &self.national_id,
            ClaimField::MemberId => &self.member_id,
            ClaimField::FacilityId => &self.facility_id,
            ClaimField::UniqueId => &self.unique_id,
            ClaimField::DiagnosisCodes => &self.diagnosis_codes,
            ClaimField::ServiceCode => &self.service_code,
            ClaimField::PaidAmount => &self.paid_amount,
            ClaimField::ApprovalNumber => &self.approval_number,
        };
        value.as_deref().filter(|v| !v.trim().is_empty())
    }
}

/// Which evaluator produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    Technical,
    Medical,
}

/// Pass/fail/error outcome of one evaluator for one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
}

/// Well-known reason codes.
pub mod reason {
    pub const OK: &str = "ok";
    pub const NO_TECHNICAL_RULES: &str = "no_technical_rules";
    pub const NO_MEDICAL_RULES: &str = "no_medical_rules";
    pub const LLM_UNAVAILABLE: &str = "llm_unavailable";
    pub const UNPARSEABLE_RESPONSE: &str = "unparseable_response";
    pub const EVALUATION_ERROR: &str = "evaluation_error";
    pub const NO_ERROR: &str = "no_error";

    /// Reason code for a claim field that failed to parse.
    pub fn malformed_field(field: super::ClaimField) -> String {
        format!("malformed_field:{field}")
    }
}

/// The outcome of one evaluator for one claim. Never mutated after creation;
/// a re-run supersedes it with a new result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub claim_id: String,
    pub evaluator: EvaluatorKind,
    pub verdict: Verdict,
    pub reason_code: String,
    pub detail: String,
    pub confidence: Option<f64>,
}

impl EvaluationResult {
    pub fn pass(
        claim_id: impl Into<String>,
        evaluator: EvaluatorKind,
        reason_code: impl Into<String>,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            evaluator,
            verdict: Verdict::Pass,
            reason_code: reason_code.into(),
            detail: String::new(),
            confidence: None,
        }
    }

    pub fn fail(
        claim_id: impl Into<String>,
        evaluator: EvaluatorKind,
        reason_code: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            evaluator,
            verdict: Verdict::Fail,
            reason_code: reason_code.into(),
            detail: detail.into(),
            confidence: None,
        }
    }

    pub fn error(
        claim_id: impl Into<String>,
        evaluator: EvaluatorKind,
        reason_code: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            evaluator,
            verdict: Verdict::Error,
            reason_code: reason_code.into(),
            detail: detail.into(),
            confidence: None,
        }
    }

    /// Attach a confidence score, clamped to [0, 1].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

/// Final per-claim classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Approved,
    Rejected,
    FlaggedForReview,
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalStatus::Approved => write!(f, "approved"),
            FinalStatus::Rejected => write!(f, "rejected"),
            FinalStatus::FlaggedForReview => write!(f, "flagged_for_review"),
        }
    }
}

/// The classified outcome of one claim: a pure function of the two
/// evaluation results under the fixed precedence policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedClaim {
    pub claim_id: String,
    pub final_status: FinalStatus,
    pub error_category: String,
    pub recommendation: String,
    pub technical: EvaluationResult,
    pub medical: EvaluationResult,
    /// Parsed paid amount, carried for metrics rollups.
    pub paid_amount: Option<f64>,
}

impl ClassifiedClaim {
    pub fn with_paid_amount(mut self, paid_amount: Option<f64>) -> Self {
        self.paid_amount = paid_amount;
        self
    }
}

/// Lifecycle state of a pipeline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One end-to-end pipeline run over a tenant's pending claims.
///
/// Mutated only by the orchestrator; immutable once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTask {
    pub task_id: String,
    pub tenant_id: String,
    pub state: TaskState,
    pub total_claims: usize,
    pub processed_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PipelineTask {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            state: TaskState::Pending,
            total_claims: 0,
            processed_count: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Aggregated counts for a tenant. Derived and rebuildable; never a source
/// of truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub tenant_id: String,
    pub total_claims: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_status: BTreeMap<FinalStatus, u64>,
    pub paid_by_category: BTreeMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_field_parse_aliases() {
        assert_eq!(ClaimField::parse("Paid Amount"), Some(ClaimField::PaidAmount));
        assert_eq!(
            ClaimField::parse("paid_amount_aed"),
            Some(ClaimField::PaidAmount)
        );
        assert_eq!(
            ClaimField::parse("approval-number"),
            Some(ClaimField::ApprovalNumber)
        );
        assert_eq!(ClaimField::parse("frobnicator"), None);
    }

    #[test]
    fn test_ensure_id_generates_when_absent() {
        let mut claim = ClaimRecord::default();
        assert!(claim.claim_id.is_empty());
        claim.ensure_id();
        assert!(!claim.claim_id.is_empty());

        let mut claim = ClaimRecord {
            claim_id: "C-1".to_string(),
            ..Default::default()
        };
        claim.ensure_id();
        assert_eq!(claim.claim_id, "C-1");
    }

    #[test]
    fn test_field_access_treats_blank_as_absent() {
        let claim = ClaimRecord {
            claim_id: "C-1".to_string(),
            member_id: Some("  ".to_string()),
            facility_id: Some("F-9".to_string()),
            ..Default::default()
        };
        assert_eq!(claim.field(ClaimField::MemberId), None);
        assert_eq!(claim.field(ClaimField::FacilityId), Some("F-9"));
        assert_eq!(claim.field(ClaimField::ClaimId), Some("C-1"));
    }

    #[test]
    fn test_rule_set_equality_ignores_extraction_time() {
        let rules = vec![RuleRecord {
            rule_id: "T-AMOUNT".to_string(),
            kind: RuleKind::Technical,
            field_or_topic: "paid_amount".to_string(),
            condition: RuleCondition::Structured(TechnicalCheck::PaidAmountThreshold {
                max: 1000.0,
            }),
            severity: Severity::Reject,
            source_excerpt: "paid amount must not exceed 1000".to_string(),
        }];
        let mut a = RuleSet::new(RuleKind::Technical, "acme", rules.clone(), "abc".to_string());
        let b = RuleSet::new(RuleKind::Technical, "acme", rules, "abc".to_string());
        a.extracted_at = a.extracted_at - chrono::Duration::hours(1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let result = EvaluationResult::pass("C-1", EvaluatorKind::Medical, reason::OK)
            .with_confidence(1.7);
        assert_eq!(result.confidence, Some(1.0));
    }
}
