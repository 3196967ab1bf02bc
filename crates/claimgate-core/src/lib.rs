//! # claimgate-core
//!
//! Deterministic claim validation engine.
//!
//! This crate provides the rule-based half of the ClaimGate validation
//! pipeline: parsing rule documents into structured rule sets, evaluating
//! claims against technical rules, combining evaluator verdicts into a final
//! classification, and folding classified claims into reporting metrics.
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same input always produces same output
//! 2. **No LLM calls**: medical rules are only *extracted* here; their
//!    evaluation lives in `claimgate-runtime`
//! 3. **Crash-free on bad data**: malformed claim fields become `error`
//!    verdicts, never panics
//! 4. **Idempotent extraction**: re-extracting an unchanged document yields
//!    an equal rule set
//!
//! ## Example
//!
//! ```rust,ignore
//! use claimgate_core::{extract, Classifier, RuleKind, TechnicalEvaluator};
//!
//! let rules = extract::extract(doc_bytes, RuleKind::Technical, "acme")?;
//! let technical = TechnicalEvaluator::new().evaluate(&claim, &rules);
//! let classified = Classifier::new().classify(technical, medical);
//! ```

pub mod classify;
pub mod extract;
pub mod metrics;
pub mod technical;
pub mod types;

// Re-export main types at crate root
pub use classify::Classifier;
pub use extract::ExtractError;
pub use technical::TechnicalEvaluator;
pub use types::{
    reason, ClaimField, ClaimRecord, ClassifiedClaim, EvaluationResult, EvaluatorKind,
    FinalStatus, MetricsSnapshot, PipelineTask, RuleCondition, RuleKind, RuleRecord, RuleSet,
    Severity, TaskState, TechnicalCheck, Verdict,
};
