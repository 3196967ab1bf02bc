//! TTL cache for extracted rule sets.
//!
//! Rule documents are uploaded rarely and read on every pipeline run, so
//! extracted rule sets are cached per tenant and rule kind. Entries expire
//! after the configured TTL; an expired read is a miss and the caller must
//! re-extract. A fresh `put` for the same key replaces the old entry
//! immediately, without waiting for expiry.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use claimgate_core::{RuleKind, RuleSet};

use crate::config::CacheConfig;

/// Cache key: one rule set per tenant per kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RuleCacheKey {
    pub tenant_id: String,
    pub kind: RuleKind,
}

impl RuleCacheKey {
    pub fn new(tenant_id: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            kind,
        }
    }
}

/// Rule set cache using moka.
///
/// Rule sets are shared as `Arc` so concurrent pipeline runs read the same
/// extraction without cloning rule vectors.
pub struct RuleCache {
    cache: Cache<RuleCacheKey, Arc<RuleSet>>,
}

impl RuleCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl)
    }

    /// Get the cached rule set, or `None` on miss or expiry.
    pub async fn get(&self, tenant_id: &str, kind: RuleKind) -> Option<Arc<RuleSet>> {
        self.cache
            .get(&RuleCacheKey::new(tenant_id, kind))
            .await
    }

    /// Store a rule set, replacing any existing entry for the key.
    pub async fn put(&self, rules: RuleSet) -> Arc<RuleSet> {
        let key = RuleCacheKey::new(rules.tenant_id.clone(), rules.kind);
        let shared = Arc::new(rules);
        self.cache.insert(key, Arc::clone(&shared)).await;
        shared
    }

    /// Drop all cached rule sets for a tenant.
    pub async fn invalidate_tenant(&self, tenant_id: &str) {
        for kind in [RuleKind::Technical, RuleKind::Medical] {
            self.cache
                .invalidate(&RuleCacheKey::new(tenant_id, kind))
                .await;
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
