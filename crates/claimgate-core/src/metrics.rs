//! Read-side metrics aggregation over classified claims.

use std::collections::BTreeMap;

use crate::types::{ClassifiedClaim, MetricsSnapshot};

/// Fold classified claims into a [`MetricsSnapshot`].
///
/// Pure and re-computable at any time; never mutates claim data. Counts
/// summed across either grouping equal the number of input records.
pub fn aggregate(tenant_id: &str, claims: &[ClassifiedClaim]) -> MetricsSnapshot {
    let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_status = BTreeMap::new();
    let mut paid_by_category: BTreeMap<String, f64> = BTreeMap::new();

    for claim in claims {
        *by_category.entry(claim.error_category.clone()).or_default() += 1;
        *by_status.entry(claim.final_status).or_default() += 1;
        if let Some(paid) = claim.paid_amount {
            *paid_by_category
                .entry(claim.error_category.clone())
                .or_default() += paid;
        }
    }

    MetricsSnapshot {
        tenant_id: tenant_id.to_string(),
        total_claims: claims.len() as u64,
        by_category,
        by_status,
        paid_by_category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Classifier;
    use crate::types::{EvaluationResult, EvaluatorKind, FinalStatus, Verdict};
    use proptest::prelude::*;

    fn classified(id: &str, tv: Verdict, mv: Verdict, paid: Option<f64>) -> ClassifiedClaim {
        let tech = match tv {
            Verdict::Pass => EvaluationResult::pass(id, EvaluatorKind::Technical, "ok"),
            Verdict::Fail => EvaluationResult::fail(id, EvaluatorKind::Technical, "T-AMOUNT", ""),
            Verdict::Error => {
                EvaluationResult::error(id, EvaluatorKind::Technical, "malformed_field:paid_amount", "")
            }
        };
        let med = match mv {
            Verdict::Pass => EvaluationResult::pass(id, EvaluatorKind::Medical, "ok"),
            Verdict::Fail => EvaluationResult::fail(id, EvaluatorKind::Medical, "M-001", ""),
            Verdict::Error => {
                EvaluationResult::error(id, EvaluatorKind::Medical, "llm_unavailable", "")
            }
        };
        Classifier::new().classify(tech, med).with_paid_amount(paid)
    }

    #[test]
    fn test_counts_by_status_and_category() {
        let claims = vec![
            classified("C-1", Verdict::Pass, Verdict::Pass, Some(100.0)),
            classified("C-2", Verdict::Fail, Verdict::Pass, Some(2000.0)),
            classified("C-3", Verdict::Fail, Verdict::Pass, Some(3000.0)),
            classified("C-4", Verdict::Pass, Verdict::Error, None),
        ];
        let snapshot = aggregate("acme", &claims);

        assert_eq!(snapshot.total_claims, 4);
        assert_eq!(snapshot.by_status[&FinalStatus::Approved], 1);
        assert_eq!(snapshot.by_status[&FinalStatus::Rejected], 2);
        assert_eq!(snapshot.by_status[&FinalStatus::FlaggedForReview], 1);
        assert_eq!(snapshot.by_category["T-AMOUNT"], 2);
        assert_eq!(snapshot.paid_by_category["T-AMOUNT"], 5000.0);
    }

    #[test]
    fn test_empty_input_yields_empty_snapshot() {
        let snapshot = aggregate("acme", &[]);
        assert_eq!(snapshot.total_claims, 0);
        assert!(snapshot.by_category.is_empty());
        assert!(snapshot.by_status.is_empty());
    }

    proptest! {
        /// Aggregation completeness: bucket sums equal the record count.
        #[test]
        fn prop_bucket_sums_equal_total(verdicts in proptest::collection::vec((0..3usize, 0..3usize), 0..50)) {
            let table = [Verdict::Pass, Verdict::Fail, Verdict::Error];
            let claims: Vec<ClassifiedClaim> = verdicts
                .iter()
                .enumerate()
                .map(|(i, (t, m))| classified(&format!("C-{i}"), table[*t], table[*m], None))
                .collect();

            let snapshot = aggregate("acme", &claims);
            let by_category_sum: u64 = snapshot.by_category.values().sum();
            let by_status_sum: u64 = snapshot.by_status.values().sum();

            prop_assert_eq!(by_category_sum, claims.len() as u64);
            prop_assert_eq!(by_status_sum, claims.len() as u64);
            prop_assert_eq!(snapshot.total_claims, claims.len() as u64);
        }
    }
}
