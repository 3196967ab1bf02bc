//! Rule extraction from technical and medical rule documents.
//!
//! The ingestion layer hands us decoded document text as bytes plus a
//! [`RuleKind`] tag. Technical documents are parsed into structured,
//! machine-checkable rules; medical documents into narrative excerpts whose
//! evaluation is delegated to the language model.
//!
//! Extraction is idempotent: the output is a pure function of the document
//! bytes, and the rule set carries a content checksum so callers can detect
//! unchanged documents.

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{
    ClaimField, RuleCondition, RuleKind, RuleRecord, RuleSet, Severity, TechnicalCheck,
};

/// Longest excerpt carried on a rule record.
const MAX_EXCERPT_LEN: usize = 240;

/// Shortest medical line worth keeping as a rule.
const MIN_MEDICAL_RULE_LEN: usize = 8;

/// Errors from rule extraction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The document has no recognizable rule structure. Fatal.
    #[error("unparsable rule document: {0}")]
    UnparsableDocument(String),

    /// The document parsed but contained zero rules. Soft failure; the
    /// caller decides whether to proceed without rules of this kind.
    #[error("no rules found in document")]
    EmptyRuleSet,
}

lazy_static! {
    /// "paid amount ... 1000" / "paid_amount threshold: 1000.50"
    static ref PAID_AMOUNT_RE: Regex =
        Regex::new(r"(?i)paid[\s_.,-]*amount[^0-9]*([0-9]+(?:\.[0-9]+)?)").unwrap();

    /// "approval number ... 100000" - the digit count of the captured value
    /// is the minimum accepted length.
    static ref APPROVAL_RE: Regex =
        Regex::new(r"(?i)approval[\s_.,-]*number[^0-9]*([0-9]+)").unwrap();

    /// "encounter types: inpatient, outpatient"
    static ref ENCOUNTER_RE: Regex =
        Regex::new(r"(?i)encounter[\s_.,-]*types?\s*[:\-]\s*(.+)").unwrap();

    /// "required fields: claim_id, member_id, ..."
    static ref REQUIRED_RE: Regex =
        Regex::new(r"(?i)required[\s_.,-]*fields?\s*[:\-]\s*(.+)").unwrap();

    /// Bullet or numbered lines in medical guideline documents.
    static ref MEDICAL_LINE_RE: Regex =
        Regex::new(r"^\s*(?:[•\-\*]|\d+[.)])\s+(.+)$").unwrap();
}

/// Hex-encoded SHA-256 of a rule document.
pub fn checksum(document: &[u8]) -> String {
    hex::encode(Sha256::digest(document))
}

/// Parse a rule document into a [`RuleSet`] for one tenant.
pub fn extract(document: &[u8], kind: RuleKind, tenant_id: &str) -> Result<RuleSet, ExtractError> {
    let text = std::str::from_utf8(document)
        .map_err(|_| ExtractError::UnparsableDocument("document is not UTF-8 text".to_string()))?;

    if text.trim().is_empty() {
        return Err(ExtractError::UnparsableDocument(
            "document is empty".to_string(),
        ));
    }

    let rules = match kind {
        RuleKind::Technical => parse_technical(text),
        RuleKind::Medical => parse_medical(text),
    };

    if rules.is_empty() {
        return Err(ExtractError::EmptyRuleSet);
    }

    tracing::debug!(
        tenant_id,
        kind = %kind,
        rule_count = rules.len(),
        "extracted rule set"
    );

    Ok(RuleSet::new(kind, tenant_id, rules, checksum(document)))
}

/// Parse technical rules: one structured rule per recognized construct, in a
/// fixed order so extraction stays deterministic regardless of document
/// layout.
fn parse_technical(text: &str) -> Vec<RuleRecord> {
    let mut amount: Option<RuleRecord> = None;
    let mut approval: Option<RuleRecord> = None;
    let mut encounter: Option<RuleRecord> = None;
    let mut required: Vec<RuleRecord> = Vec::new();

    for line in text.lines() {
        if amount.is_none() {
            if let Some(caps) = PAID_AMOUNT_RE.captures(line) {
                if let Ok(max) = caps[1].parse::<f64>() {
                    amount = Some(technical_rule(
                        "T-AMOUNT",
                        ClaimField::PaidAmount.as_str(),
                        TechnicalCheck::PaidAmountThreshold { max },
                        line,
                    ));
                    continue;
                }
            }
        }

        if approval.is_none() {
            if let Some(caps) = APPROVAL_RE.captures(line) {
                let min_digits = caps[1].trim().len();
                approval = Some(technical_rule(
                    "T-APPROVAL",
                    ClaimField::ApprovalNumber.as_str(),
                    TechnicalCheck::ApprovalNumberMinLength { min_digits },
                    line,
                ));
                continue;
            }
        }

        if encounter.is_none() {
            if let Some(caps) = ENCOUNTER_RE.captures(line) {
                let allowed = split_list(&caps[1])
                    .map(|t| t.to_ascii_lowercase())
                    .collect::<Vec<_>>();
                if !allowed.is_empty() {
                    encounter = Some(technical_rule(
                        "T-ENCOUNTER",
                        ClaimField::EncounterType.as_str(),
                        TechnicalCheck::AllowedEncounterTypes { allowed },
                        line,
                    ));
                    continue;
                }
            }
        }

        if required.is_empty() {
            if let Some(caps) = REQUIRED_RE.captures(line) {
                let mut seen = Vec::new();
                for token in split_list(&caps[1]) {
                    let Some(field) = ClaimField::parse(token) else {
                        tracing::warn!(token, "unknown field name in required-fields rule");
                        continue;
                    };
                    if seen.contains(&field) {
                        continue;
                    }
                    seen.push(field);
                    required.push(technical_rule(
                        &format!("T-REQ-{}", field.as_str().to_ascii_uppercase()),
                        field.as_str(),
                        TechnicalCheck::RequiredField { field },
                        line,
                    ));
                }
            }
        }
    }

    amount
        .into_iter()
        .chain(approval)
        .chain(encounter)
        .chain(required)
        .collect()
}

/// Parse medical rules: bullet or numbered guideline lines become narrative
/// excerpts, anchored on the first clinical keyword they mention.
fn parse_medical(text: &str) -> Vec<RuleRecord> {
    let mut rules = Vec::new();

    for line in text.lines() {
        let Some(caps) = MEDICAL_LINE_RE.captures(line) else {
            continue;
        };
        let excerpt = caps[1].trim();
        if excerpt.len() < MIN_MEDICAL_RULE_LEN {
            continue;
        }
        let excerpt = truncate(excerpt, MAX_EXCERPT_LEN);
        rules.push(RuleRecord {
            rule_id: format!("M-{:03}", rules.len() + 1),
            kind: RuleKind::Medical,
            field_or_topic: medical_topic(&excerpt).to_string(),
            condition: RuleCondition::Narrative(excerpt.clone()),
            severity: Severity::Review,
            source_excerpt: excerpt,
        });
    }

    rules
}

fn technical_rule(
    rule_id: &str,
    field: &str,
    check: TechnicalCheck,
    source_line: &str,
) -> RuleRecord {
    RuleRecord {
        rule_id: rule_id.to_string(),
        kind: RuleKind::Technical,
        field_or_topic: field.to_string(),
        condition: RuleCondition::Structured(check),
        severity: Severity::Reject,
        source_excerpt: truncate(source_line.trim(), MAX_EXCERPT_LEN),
    }
}

/// Split a comma/semicolon separated list into trimmed tokens.
fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|t| t.len() > 2)
}

/// Keyword anchor for a medical excerpt.
fn medical_topic(excerpt: &str) -> &'static str {
    let lower = excerpt.to_ascii_lowercase();
    for (keyword, topic) in [
        ("diagnos", "diagnosis"),
        ("service", "service"),
        ("encounter", "encounter"),
        ("approval", "approval"),
        ("amount", "amount"),
        ("facilit", "facility"),
    ] {
        if lower.contains(keyword) {
            return topic;
        }
    }
    "general"
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TECHNICAL_DOC: &str = "\
Adjudication thresholds

Paid amount must not exceed 1000 per claim.
Approval number must be at least 100000.
Encounter types: inpatient, outpatient, emergency
Required fields: claim_id, member_id, paid_amount
";

    const MEDICAL_DOC: &str = "\
Clinical review guidelines

- Diagnosis codes must support the billed service code.
- Inpatient encounters require documented admission criteria.
1. Services exceeding standard frequency require clinical justification.
* short
";

    #[test]
    fn test_technical_extraction() {
        let set = extract(TECHNICAL_DOC.as_bytes(), RuleKind::Technical, "acme").unwrap();

        let ids: Vec<&str> = set.rules.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "T-AMOUNT",
                "T-APPROVAL",
                "T-ENCOUNTER",
                "T-REQ-CLAIM_ID",
                "T-REQ-MEMBER_ID",
                "T-REQ-PAID_AMOUNT",
            ]
        );

        assert!(matches!(
            set.rules[0].condition,
            RuleCondition::Structured(TechnicalCheck::PaidAmountThreshold { max }) if max == 1000.0
        ));
        assert!(matches!(
            set.rules[1].condition,
            RuleCondition::Structured(TechnicalCheck::ApprovalNumberMinLength { min_digits: 6 })
        ));
    }

    #[test]
    fn test_encounter_types_are_lowercased() {
        let doc = "Encounter Types: Inpatient, OUTPATIENT";
        let set = extract(doc.as_bytes(), RuleKind::Technical, "acme").unwrap();
        match &set.rules[0].condition {
            RuleCondition::Structured(TechnicalCheck::AllowedEncounterTypes { allowed }) => {
                assert_eq!(allowed, &vec!["inpatient".to_string(), "outpatient".to_string()]);
            }
            other => panic!("unexpected condition: {other:?}"),
        }
    }

    #[test]
    fn test_medical_extraction_keeps_bullets_and_numbers() {
        let set = extract(MEDICAL_DOC.as_bytes(), RuleKind::Medical, "acme").unwrap();
        assert_eq!(set.rules.len(), 3);
        assert_eq!(set.rules[0].rule_id, "M-001");
        assert_eq!(set.rules[0].field_or_topic, "diagnosis");
        assert!(matches!(set.rules[2].condition, RuleCondition::Narrative(_)));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let a = extract(TECHNICAL_DOC.as_bytes(), RuleKind::Technical, "acme").unwrap();
        let b = extract(TECHNICAL_DOC.as_bytes(), RuleKind::Technical, "acme").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source_checksum, b.source_checksum);
    }

    #[test]
    fn test_empty_document_is_unparsable() {
        let err = extract(b"   \n  ", RuleKind::Technical, "acme").unwrap_err();
        assert!(matches!(err, ExtractError::UnparsableDocument(_)));
    }

    #[test]
    fn test_non_utf8_is_unparsable() {
        let err = extract(&[0xff, 0xfe, 0x00], RuleKind::Medical, "acme").unwrap_err();
        assert!(matches!(err, ExtractError::UnparsableDocument(_)));
    }

    #[test]
    fn test_no_recognized_rules_is_soft_failure() {
        let err = extract(b"nothing relevant here", RuleKind::Technical, "acme").unwrap_err();
        assert_eq!(err, ExtractError::EmptyRuleSet);
    }

    #[test]
    fn test_unknown_required_field_is_skipped() {
        let doc = "Required fields: claim_id, frobnicator";
        let set = extract(doc.as_bytes(), RuleKind::Technical, "acme").unwrap();
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].rule_id, "T-REQ-CLAIM_ID");
    }
}
