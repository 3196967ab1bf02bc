//! LLM-mediated medical necessity evaluation.
//!
//! The evaluator renders the claim and the narrative medical rules into a
//! single prompt, asks the client for a JSON verdict, and converts every
//! failure mode into an `error` verdict instead of propagating it. A claim is
//! therefore never lost to a flaky model; the worst outcome is a flag for
//! human review.
//!
//! Retry applies only to transient transport failures. A response that comes
//! back but cannot be parsed gets exactly one re-ask with a stricter prompt,
//! then becomes `unparseable_response`.

use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use claimgate_core::types::reason;
use claimgate_core::{ClaimRecord, EvaluationResult, EvaluatorKind, RuleCondition, RuleSet};

use crate::config::{PromptConfig, RetryConfig};
use crate::providers::{CompletionConfig, LlmClient, ProviderError};

/// Reason code when the model rejects without naming a rule.
const MEDICAL_NECESSITY: &str = "medical_necessity";

/// Verdict JSON the model is asked to produce.
#[derive(Debug, Deserialize)]
struct LlmVerdict {
    appropriate: bool,
    #[serde(default)]
    rule_id: Option<String>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    confidence: Option<f64>,
}

pub struct MedicalEvaluator {
    client: Arc<dyn LlmClient>,
    retry: RetryConfig,
    completion: CompletionConfig,
    prompt: PromptConfig,
}

impl MedicalEvaluator {
    pub fn new(
        client: Arc<dyn LlmClient>,
        retry: RetryConfig,
        completion: CompletionConfig,
        prompt: PromptConfig,
    ) -> Self {
        Self {
            client,
            retry,
            completion,
            prompt,
        }
    }

    /// Evaluate one claim against the medical rule set.
    ///
    /// Infallible by contract: transport exhaustion and unparseable output
    /// become `error` verdicts with `llm_unavailable` and
    /// `unparseable_response` reason codes.
    pub async fn evaluate(&self, claim: &ClaimRecord, rules: &RuleSet) -> EvaluationResult {
        if rules.rules.is_empty() {
            return EvaluationResult::pass(&claim.claim_id, EvaluatorKind::Medical, reason::NO_MEDICAL_RULES);
        }

        let prompt = self.render_prompt(claim, rules, false);
        let response = match self.complete_with_retry(&claim.claim_id, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(claim_id = %claim.claim_id, error = %e, "LLM unavailable after retries");
                return EvaluationResult::error(
                    &claim.claim_id,
                    EvaluatorKind::Medical,
                    reason::LLM_UNAVAILABLE,
                    e.to_string(),
                );
            }
        };

        match parse_verdict(&response) {
            Ok(verdict) => self.classify_verdict(claim, verdict),
            Err(first_err) => {
                // One re-ask with a stricter prompt before giving up.
                debug!(claim_id = %claim.claim_id, error = %first_err, "verdict parse failed, re-asking");
                let strict = self.render_prompt(claim, rules, true);
                match self.complete_with_retry(&claim.claim_id, &strict).await {
                    Ok(text) => match parse_verdict(&text) {
                        Ok(verdict) => self.classify_verdict(claim, verdict),
                        Err(e) => EvaluationResult::error(
                            &claim.claim_id,
                            EvaluatorKind::Medical,
                            reason::UNPARSEABLE_RESPONSE,
                            e,
                        ),
                    },
                    Err(e) => EvaluationResult::error(
                        &claim.claim_id,
                        EvaluatorKind::Medical,
                        reason::LLM_UNAVAILABLE,
                        e.to_string(),
                    ),
                }
            }
        }
    }

    fn classify_verdict(&self, claim: &ClaimRecord, verdict: LlmVerdict) -> EvaluationResult {
        let result = if verdict.appropriate {
            EvaluationResult::pass(&claim.claim_id, EvaluatorKind::Medical, reason::OK)
        } else {
            let reason_code = verdict
                .rule_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| MEDICAL_NECESSITY.to_string());
            EvaluationResult::fail(
                &claim.claim_id,
                EvaluatorKind::Medical,
                reason_code,
                verdict.reason,
            )
        };
        match verdict.confidence {
            Some(c) => result.with_confidence(c),
            None => result,
        }
    }

    async fn complete_with_retry(
        &self,
        claim_id: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry.min_delay)
            .with_max_delay(self.retry.max_delay)
            .with_max_times(self.retry.max_attempts.saturating_sub(1))
            .with_jitter();

        (|| async { self.client.complete(prompt, &self.completion).await })
            .retry(backoff)
            .when(ProviderError::is_retryable)
            .notify(|err, dur| {
                warn!(claim_id, error = %err, retry_in = ?dur, "transient LLM failure, backing off");
            })
            .await
    }

    fn render_prompt(&self, claim: &ClaimRecord, rules: &RuleSet, strict: bool) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str(
            "You are a clinical claims auditor. Decide whether the claim below is \
             medically appropriate under the listed adjudication rules.\n\nRULES:\n",
        );

        for rule in rules.rules.iter().take(self.prompt.max_rules) {
            let text = match &rule.condition {
                RuleCondition::Narrative(text) => text.as_str(),
                RuleCondition::Structured(_) => rule.source_excerpt.as_str(),
            };
            out.push_str("- [");
            out.push_str(&rule.rule_id);
            out.push_str("] ");
            out.push_str(truncated(text, self.prompt.max_excerpt_len));
            out.push('\n');
        }

        out.push_str("\nCLAIM:\n");
        push_field(&mut out, "claim_id", Some(&claim.claim_id));
        push_field(&mut out, "encounter_type", claim.encounter_type.as_deref());
        push_field(&mut out, "service_date", claim.service_date.as_deref());
        push_field(&mut out, "diagnosis_codes", claim.diagnosis_codes.as_deref());
        push_field(&mut out, "service_code", claim.service_code.as_deref());
        push_field(&mut out, "paid_amount", claim.paid_amount.as_deref());
        push_field(&mut out, "approval_number", claim.approval_number.as_deref());

        out.push_str(
            "\nRespond with a single JSON object and nothing else:\n\
             {\"appropriate\": true|false, \"rule_id\": \"<violated rule id or null>\", \
             \"reason\": \"<one sentence>\", \"confidence\": <0.0-1.0>}\n",
        );
        if strict {
            out.push_str(
                "Your previous answer was not valid JSON. Output ONLY the JSON object, \
                 with no prose, no code fences, and no trailing text.\n",
            );
        }
        out
    }
}

fn push_field(out: &mut String, name: &str, value: Option<&str>) {
    out.push_str("  ");
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value.filter(|v| !v.trim().is_empty()).unwrap_or("<missing>"));
    out.push('\n');
}

fn truncated(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Extract and parse the first JSON object in the response.
///
/// Models wrap verdicts in prose or code fences often enough that slicing
/// from the first `{` to the last `}` is the pragmatic envelope.
fn parse_verdict(response: &str) -> Result<LlmVerdict, String> {
    let start = response
        .find('{')
        .ok_or_else(|| "no JSON object in response".to_string())?;
    let end = response
        .rfind('}')
        .ok_or_else(|| "unterminated JSON object in response".to_string())?;
    if end < start {
        return Err("unterminated JSON object in response".to_string());
    }
    serde_json::from_str(&response[start..=end]).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use claimgate_core::{extract, RuleKind, Verdict};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MEDICAL_DOC: &[u8] = b"Medical necessity guidelines:\n\
        - Inpatient admission requires documented failure of outpatient management.\n\
        - Imaging of the spine requires six weeks of conservative therapy first.\n";

    fn medical_rules() -> RuleSet {
        extract::extract(MEDICAL_DOC, RuleKind::Medical, "acme").unwrap()
    }

    fn claim(id: &str) -> ClaimRecord {
        ClaimRecord {
            claim_id: id.to_string(),
            encounter_type: Some("inpatient".to_string()),
            service_code: Some("MRI-LSPINE".to_string()),
            paid_amount: Some("420.00".to_string()),
            ..Default::default()
        }
    }

    /// Scripted client: pops one canned response per call.
    struct ScriptedClient {
        script: parking_lot::Mutex<Vec<Result<String, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: parking_lot::Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(
            &self,
            _prompt: &str,
            _config: &CompletionConfig,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.is_empty() {
                Err(ProviderError::Transport("script exhausted".to_string()))
            } else {
                script.remove(0)
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            min_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(4),
        }
    }

    fn evaluator(client: Arc<ScriptedClient>) -> MedicalEvaluator {
        MedicalEvaluator::new(
            client,
            fast_retry(),
            CompletionConfig::default(),
            PromptConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_appropriate_claim_passes() {
        let client = ScriptedClient::new(vec![Ok(
            r#"{"appropriate": true, "rule_id": null, "reason": "documented", "confidence": 0.92}"#
                .to_string(),
        )]);
        let result = evaluator(client.clone())
            .evaluate(&claim("C-1"), &medical_rules())
            .await;

        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(result.confidence, Some(0.92));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_inappropriate_claim_fails_with_rule_id() {
        let client = ScriptedClient::new(vec![Ok(
            r#"{"appropriate": false, "rule_id": "M-002", "reason": "no conservative therapy documented", "confidence": 0.8}"#
                .to_string(),
        )]);
        let result = evaluator(client)
            .evaluate(&claim("C-2"), &medical_rules())
            .await;

        assert_eq!(result.verdict, Verdict::Fail);
        assert_eq!(result.reason_code, "M-002");
    }

    #[tokio::test]
    async fn test_rejection_without_rule_id_gets_generic_code() {
        let client = ScriptedClient::new(vec![Ok(
            r#"{"appropriate": false, "reason": "not indicated"}"#.to_string(),
        )]);
        let result = evaluator(client)
            .evaluate(&claim("C-3"), &medical_rules())
            .await;

        assert_eq!(result.verdict, Verdict::Fail);
        assert_eq!(result.reason_code, MEDICAL_NECESSITY);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let client = ScriptedClient::new(vec![
            Err(ProviderError::Transport("connection reset".to_string())),
            Ok(r#"{"appropriate": true, "reason": "ok"}"#.to_string()),
        ]);
        let result = evaluator(client.clone())
            .evaluate(&claim("C-4"), &medical_rules())
            .await;

        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_llm_unavailable() {
        let client = ScriptedClient::new(vec![
            Err(ProviderError::Transport("reset".to_string())),
            Err(ProviderError::Transport("reset".to_string())),
            Err(ProviderError::Transport("reset".to_string())),
        ]);
        let result = evaluator(client.clone())
            .evaluate(&claim("C-5"), &medical_rules())
            .await;

        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.reason_code, reason::LLM_UNAVAILABLE);
        // max_attempts total, not max_attempts retries
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let client = ScriptedClient::new(vec![Err(ProviderError::Api {
            status: 400,
            message: "bad request".to_string(),
        })]);
        let result = evaluator(client.clone())
            .evaluate(&claim("C-6"), &medical_rules())
            .await;

        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.reason_code, reason::LLM_UNAVAILABLE);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_garbage_then_valid_json_on_strict_reask() {
        let client = ScriptedClient::new(vec![
            Ok("I think this claim looks fine overall.".to_string()),
            Ok(r#"{"appropriate": true, "reason": "ok"}"#.to_string()),
        ]);
        let result = evaluator(client.clone())
            .evaluate(&claim("C-7"), &medical_rules())
            .await;

        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_persistent_garbage_becomes_unparseable() {
        let client = ScriptedClient::new(vec![
            Ok("no json here".to_string()),
            Ok("still no json".to_string()),
        ]);
        let result = evaluator(client)
            .evaluate(&claim("C-8"), &medical_rules())
            .await;

        assert_eq!(result.verdict, Verdict::Error);
        assert_eq!(result.reason_code, reason::UNPARSEABLE_RESPONSE);
    }

    #[tokio::test]
    async fn test_empty_rule_set_passes_without_llm_call() {
        let client = ScriptedClient::new(vec![]);
        let empty = RuleSet::new(RuleKind::Medical, "acme", vec![], "0".repeat(64));
        let result = evaluator(client.clone()).evaluate(&claim("C-9"), &empty).await;

        assert_eq!(result.verdict, Verdict::Pass);
        assert_eq!(result.reason_code, reason::NO_MEDICAL_RULES);
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn test_parse_verdict_strips_code_fences() {
        let wrapped = "```json\n{\"appropriate\": false, \"rule_id\": \"M-001\", \"reason\": \"x\"}\n```";
        let verdict = parse_verdict(wrapped).unwrap();
        assert!(!verdict.appropriate);
        assert_eq!(verdict.rule_id.as_deref(), Some("M-001"));
    }

    #[test]
    fn test_parse_verdict_rejects_prose() {
        assert!(parse_verdict("the claim is appropriate").is_err());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let verdict = LlmVerdict {
            appropriate: true,
            rule_id: None,
            reason: String::new(),
            confidence: Some(3.0),
        };
        let eval = MedicalEvaluator::new(
            ScriptedClient::new(vec![]),
            fast_retry(),
            CompletionConfig::default(),
            PromptConfig::default(),
        );
        let result = eval.classify_verdict(&claim("C-10"), verdict);
        assert_eq!(result.confidence, Some(1.0));
    }
}
