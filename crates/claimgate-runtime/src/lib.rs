//! # claimgate-runtime
//!
//! Async validation runtime on top of `claimgate-core`.
//!
//! This crate owns everything with a clock, a network, or shared state: the
//! LLM client seam and its retry envelope, the TTL rule cache, claim and
//! result persistence, the task registry, and the pipeline orchestrator that
//! ties them together.
//!
//! ## Architecture
//!
//! ```text
//! install_rules ──> extract (core) ──> RuleCache
//!
//! trigger_run ──> TaskRegistry (one live run per tenant)
//!                     │
//!                     ▼
//!            PipelineOrchestrator
//!              ├─ TechnicalEvaluator (core, deterministic)
//!              ├─ MedicalEvaluator ──> LlmClient (retry + backoff)
//!              ├─ Classifier (core)
//!              └─ ClaimStore (persist, then count progress)
//! ```
//!
//! Evaluation failures never abort a run; they surface as flagged claims.

pub mod cache;
pub mod config;
pub mod medical;
pub mod orchestrator;
pub mod providers;
pub mod store;
pub mod task;

// Re-export main types at crate root
pub use cache::{RuleCache, RuleCacheKey};
pub use config::{CacheConfig, MaxConcurrency, PromptConfig, RetryConfig, RuntimeConfig};
pub use medical::MedicalEvaluator;
pub use orchestrator::PipelineOrchestrator;
pub use providers::{
    ApiCredential, CompletionConfig, CredentialSource, LlmClient, ProviderError,
};
pub use store::{AuditEvent, AuditSink, ClaimStore, MemoryStore, StoreError, TracingAudit};
pub use task::{CancelToken, TaskError, TaskRegistry};

#[cfg(feature = "openai")]
pub use providers::OpenAiClient;
