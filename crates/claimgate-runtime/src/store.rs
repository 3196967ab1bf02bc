//! Persistence seams for claims and classified results.
//!
//! The orchestrator talks to storage through [`ClaimStore`] so the pipeline
//! is testable without a database. [`MemoryStore`] is the in-process
//! implementation used in tests and single-node deployments.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

use claimgate_core::{ClaimRecord, ClassifiedClaim};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Claim storage backend.
///
/// `persist_result` must be idempotent per `(tenant_id, claim_id)`; re-running
/// a pipeline overwrites the previous classification rather than duplicating
/// rows.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Claims awaiting validation for a tenant.
    async fn load_claims(&self, tenant_id: &str) -> Result<Vec<ClaimRecord>, StoreError>;

    /// Persist one classified claim, overwriting any previous result for the
    /// same claim id.
    async fn persist_result(
        &self,
        tenant_id: &str,
        result: &ClassifiedClaim,
    ) -> Result<(), StoreError>;

    /// All classified results for a tenant, ordered by claim id.
    async fn load_results(&self, tenant_id: &str) -> Result<Vec<ClassifiedClaim>, StoreError>;
}

/// In-memory claim store keyed by tenant.
#[derive(Default)]
pub struct MemoryStore {
    claims: RwLock<BTreeMap<String, Vec<ClaimRecord>>>,
    results: RwLock<BTreeMap<String, BTreeMap<String, ClassifiedClaim>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed pending claims for a tenant, replacing any existing set.
    pub fn seed_claims(&self, tenant_id: &str, claims: Vec<ClaimRecord>) {
        self.claims.write().insert(tenant_id.to_string(), claims);
    }

    pub fn result_count(&self, tenant_id: &str) -> usize {
        self.results
            .read()
            .get(tenant_id)
            .map_or(0, |by_claim| by_claim.len())
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn load_claims(&self, tenant_id: &str) -> Result<Vec<ClaimRecord>, StoreError> {
        Ok(self.claims.read().get(tenant_id).cloned().unwrap_or_default())
    }

    async fn persist_result(
        &self,
        tenant_id: &str,
        result: &ClassifiedClaim,
    ) -> Result<(), StoreError> {
        self.results
            .write()
            .entry(tenant_id.to_string())
            .or_default()
            .insert(result.claim_id.clone(), result.clone());
        Ok(())
    }

    async fn load_results(&self, tenant_id: &str) -> Result<Vec<ClassifiedClaim>, StoreError> {
        Ok(self
            .results
            .read()
            .get(tenant_id)
            .map(|by_claim| by_claim.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// Noteworthy pipeline events for the audit trail.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    RunStarted {
        task_id: String,
        tenant_id: String,
        total_claims: u64,
    },
    RunFinished {
        task_id: String,
        tenant_id: String,
        state: String,
        processed: u64,
    },
    ClaimErrored {
        task_id: String,
        claim_id: String,
        reason_code: String,
    },
    RulesInstalled {
        tenant_id: String,
        kind: String,
        rule_count: usize,
    },
}

/// Fire-and-forget audit sink. Implementations must not block the pipeline.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Audit sink that emits structured log events.
#[derive(Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: AuditEvent) {
        match event {
            AuditEvent::RunStarted {
                task_id,
                tenant_id,
                total_claims,
            } => {
                info!(task_id, tenant_id, total_claims, "pipeline run started");
            }
            AuditEvent::RunFinished {
                task_id,
                tenant_id,
                state,
                processed,
            } => {
                info!(task_id, tenant_id, state, processed, "pipeline run finished");
            }
            AuditEvent::ClaimErrored {
                task_id,
                claim_id,
                reason_code,
            } => {
                info!(task_id, claim_id, reason_code, "claim flagged with evaluation error");
            }
            AuditEvent::RulesInstalled {
                tenant_id,
                kind,
                rule_count,
            } => {
                info!(tenant_id, kind, rule_count, "rule set installed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimgate_core::{Classifier, EvaluationResult, EvaluatorKind};

    fn classified(id: &str) -> ClassifiedClaim {
        Classifier::new().classify(
            EvaluationResult::pass(id, EvaluatorKind::Technical, "ok"),
            EvaluationResult::pass(id, EvaluatorKind::Medical, "ok"),
        )
    }

    #[tokio::test]
    async fn test_load_claims_empty_tenant() {
        let store = MemoryStore::new();
        assert!(store.load_claims("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_is_idempotent_per_claim() {
        let store = MemoryStore::new();
        store.persist_result("acme", &classified("C-1")).await.unwrap();
        store.persist_result("acme", &classified("C-1")).await.unwrap();
        store.persist_result("acme", &classified("C-2")).await.unwrap();

        assert_eq!(store.result_count("acme"), 2);
    }

    #[tokio::test]
    async fn test_results_are_tenant_scoped() {
        let store = MemoryStore::new();
        store.persist_result("acme", &classified("C-1")).await.unwrap();

        assert_eq!(store.result_count("acme"), 1);
        assert_eq!(store.result_count("globex"), 0);
        assert!(store.load_results("globex").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_results_ordered_by_claim_id() {
        let store = MemoryStore::new();
        store.persist_result("acme", &classified("C-9")).await.unwrap();
        store.persist_result("acme", &classified("C-1")).await.unwrap();

        let results = store.load_results("acme").await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.claim_id.as_str()).collect();
        assert_eq!(ids, vec!["C-1", "C-9"]);
    }
}
