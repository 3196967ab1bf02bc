//! Pipeline orchestrator: rule installation and end-to-end validation runs.
//!
//! A run is admitted through the task registry (one live run per tenant),
//! spawned onto the tokio runtime, and driven as a bounded-concurrency stream
//! over the tenant's pending claims. Each claim flows through the technical
//! evaluator, the medical evaluator, and the classifier; the result is
//! persisted before the progress counter moves, so `processed_count` never
//! exceeds the number of stored results.
//!
//! Evaluation never aborts a run: per-claim failures become `error` verdicts
//! and flagged claims. Only run-level conditions are fatal, such as a tenant
//! with no rule sets installed at all.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};

use claimgate_core::types::reason;
use claimgate_core::{
    extract, metrics, ClaimRecord, Classifier, ClassifiedClaim, ExtractError, FinalStatus,
    MetricsSnapshot, PipelineTask, RuleKind, RuleSet, TaskState, TechnicalEvaluator,
};

use crate::cache::RuleCache;
use crate::config::RuntimeConfig;
use crate::medical::MedicalEvaluator;
use crate::providers::LlmClient;
use crate::store::{AuditEvent, AuditSink, ClaimStore, StoreError};
use crate::task::{CancelToken, TaskError, TaskRegistry};

const NO_RULES_INSTALLED: &str = "no rule sets installed for tenant";

pub struct PipelineOrchestrator {
    store: Arc<dyn ClaimStore>,
    audit: Arc<dyn AuditSink>,
    cache: RuleCache,
    technical: TechnicalEvaluator,
    medical: MedicalEvaluator,
    classifier: Classifier,
    registry: TaskRegistry,
    config: RuntimeConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn ClaimStore>,
        audit: Arc<dyn AuditSink>,
        client: Arc<dyn LlmClient>,
        config: RuntimeConfig,
    ) -> Self {
        let medical = MedicalEvaluator::new(
            client,
            config.retry.clone(),
            config.completion.clone(),
            config.prompt.clone(),
        );
        Self {
            store,
            audit,
            cache: RuleCache::from_config(&config.cache),
            technical: TechnicalEvaluator::new(),
            medical,
            classifier: Classifier::new(),
            registry: TaskRegistry::new(),
            config,
        }
    }

    /// Extract a rule document and install the result for a tenant.
    ///
    /// A document that parses but yields no rules is a soft failure: an empty
    /// rule set is installed (that evaluator passes everything) and `Ok(0)`
    /// is returned. An unreadable document installs nothing.
    pub async fn install_rules(
        &self,
        tenant_id: &str,
        kind: RuleKind,
        document: &[u8],
    ) -> Result<usize, ExtractError> {
        let rules = match extract::extract(document, kind, tenant_id) {
            Ok(rules) => rules,
            Err(ExtractError::EmptyRuleSet) => {
                warn!(tenant_id, %kind, "document yielded no rules, installing empty set");
                RuleSet::new(kind, tenant_id, Vec::new(), extract::checksum(document))
            }
            Err(e) => {
                warn!(tenant_id, %kind, error = %e, "rule document rejected");
                return Err(e);
            }
        };

        let count = rules.rules.len();
        self.cache.put(rules).await;
        self.audit.record(AuditEvent::RulesInstalled {
            tenant_id: tenant_id.to_string(),
            kind: kind.to_string(),
            rule_count: count,
        });
        Ok(count)
    }

    /// Start a validation run for a tenant.
    ///
    /// Returns the pending task immediately; the run itself executes on a
    /// spawned tokio task. Fails with [`TaskError::TaskAlreadyRunning`] if the
    /// tenant already has a live run.
    pub fn trigger_run(
        self: &Arc<Self>,
        tenant_id: &str,
    ) -> Result<PipelineTask, TaskError> {
        let (task, token) = self.registry.begin(tenant_id)?;

        let this = Arc::clone(self);
        let task_id = task.task_id.clone();
        let tenant = tenant_id.to_string();
        tokio::spawn(async move {
            this.run(&task_id, &tenant, token).await;
        });

        Ok(task)
    }

    async fn run(&self, task_id: &str, tenant_id: &str, token: CancelToken) {
        let claims = match self.store.load_claims(tenant_id).await {
            Ok(claims) => claims,
            Err(e) => {
                error!(task_id, tenant_id, error = %e, "failed to load claims");
                self.registry
                    .finish(task_id, TaskState::Failed, Some(e.to_string()));
                return;
            }
        };

        if self.registry.mark_running(task_id, claims.len()).is_err() {
            return;
        }
        self.audit.record(AuditEvent::RunStarted {
            task_id: task_id.to_string(),
            tenant_id: tenant_id.to_string(),
            total_claims: claims.len() as u64,
        });

        let tech_rules = self.cache.get(tenant_id, RuleKind::Technical).await;
        let med_rules = self.cache.get(tenant_id, RuleKind::Medical).await;

        // No rules of either kind is an operator error, not a claim problem.
        if tech_rules.is_none() && med_rules.is_none() {
            error!(task_id, tenant_id, "{NO_RULES_INSTALLED}");
            self.registry.finish(
                task_id,
                TaskState::Failed,
                Some(NO_RULES_INSTALLED.to_string()),
            );
            self.emit_finished(task_id, tenant_id);
            return;
        }

        // A single missing kind degrades to an empty set; that evaluator
        // passes every claim with its no-rules reason code.
        let tech_rules = tech_rules.unwrap_or_else(|| {
            Arc::new(RuleSet::new(
                RuleKind::Technical,
                tenant_id,
                Vec::new(),
                extract::checksum(&[]),
            ))
        });
        let med_rules = med_rules.unwrap_or_else(|| {
            Arc::new(RuleSet::new(
                RuleKind::Medical,
                tenant_id,
                Vec::new(),
                extract::checksum(&[]),
            ))
        });

        stream::iter(claims)
            .map(|claim| self.process_claim(task_id, tenant_id, claim, &token, &tech_rules, &med_rules))
            .buffer_unordered(self.config.max_concurrency.get())
            .collect::<Vec<()>>()
            .await;

        let final_state = if token.is_cancelled() {
            TaskState::Cancelled
        } else {
            TaskState::Completed
        };
        self.registry.finish(task_id, final_state, None);
        self.emit_finished(task_id, tenant_id);
    }

    async fn process_claim(
        &self,
        task_id: &str,
        tenant_id: &str,
        mut claim: ClaimRecord,
        token: &CancelToken,
        tech_rules: &RuleSet,
        med_rules: &RuleSet,
    ) {
        // Checked between claims; an in-flight evaluation always completes
        // and keeps its persisted result.
        if token.is_cancelled() {
            return;
        }

        claim.ensure_id();

        let technical = self.technical.evaluate(&claim, tech_rules);
        let medical = self.medical.evaluate(&claim, med_rules).await;

        let paid_amount = claim
            .paid_amount
            .as_deref()
            .and_then(|raw| raw.trim().parse::<f64>().ok());
        let classified = self
            .classifier
            .classify(technical, medical)
            .with_paid_amount(paid_amount);

        if classified.final_status == FinalStatus::FlaggedForReview {
            self.audit.record(AuditEvent::ClaimErrored {
                task_id: task_id.to_string(),
                claim_id: classified.claim_id.clone(),
                reason_code: flag_reason(&classified).to_string(),
            });
        }

        match self.store.persist_result(tenant_id, &classified).await {
            Ok(()) => self.registry.record_processed(task_id),
            Err(e) => {
                // Not counted as processed; progress only tracks stored rows.
                error!(task_id, claim_id = %classified.claim_id, error = %e, "failed to persist result");
            }
        }
    }

    fn emit_finished(&self, task_id: &str, tenant_id: &str) {
        if let Some(task) = self.registry.snapshot(task_id) {
            info!(task_id, tenant_id, state = %task.state, processed = task.processed_count, "run finished");
            self.audit.record(AuditEvent::RunFinished {
                task_id: task_id.to_string(),
                tenant_id: tenant_id.to_string(),
                state: task.state.to_string(),
                processed: task.processed_count as u64,
            });
        }
    }

    pub fn get_task_status(&self, task_id: &str) -> Option<PipelineTask> {
        self.registry.snapshot(task_id)
    }

    pub fn list_tasks(&self, tenant_id: &str) -> Vec<PipelineTask> {
        self.registry.list(tenant_id)
    }

    /// Request cancellation of a live run. Returns false if the task is
    /// unknown or already terminal.
    pub fn cancel_run(&self, task_id: &str) -> bool {
        self.registry.cancel(task_id)
    }

    /// Stored results and their metrics snapshot for a tenant.
    pub async fn get_results(
        &self,
        tenant_id: &str,
    ) -> Result<(Vec<ClassifiedClaim>, MetricsSnapshot), StoreError> {
        let results = self.store.load_results(tenant_id).await?;
        let snapshot = metrics::aggregate(tenant_id, &results);
        Ok((results, snapshot))
    }
}

/// Which evaluator's error reason to surface in the audit trail.
fn flag_reason(claim: &ClassifiedClaim) -> &str {
    use claimgate_core::Verdict;
    if claim.technical.verdict == Verdict::Error {
        &claim.technical.reason_code
    } else {
        &claim.medical.reason_code
    }
}
