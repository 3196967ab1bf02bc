//! Runtime configuration.
//!
//! Retry counts, backoff curve, cache TTL, and prompt bounds are
//! configuration rather than constants so operators can tune them without a
//! rebuild.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::providers::CompletionConfig;

/// Serde helpers for durations expressed as humantime strings ("250ms", "1h").
pub(crate) mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Retry policy for LLM transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first call.
    pub max_attempts: usize,

    /// Initial backoff delay.
    #[serde(with = "duration_human")]
    pub min_delay: Duration,

    /// Backoff ceiling.
    #[serde(with = "duration_human")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

/// Rule cache sizing and staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries expire after this long; the next read is a miss.
    #[serde(with = "duration_human")]
    pub ttl: Duration,

    /// Upper bound on cached rule sets (tenants x kinds).
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 64,
        }
    }
}

/// Bounds on the medical evaluation prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// At most this many medical rule excerpts per prompt.
    pub max_rules: usize,

    /// Each excerpt truncated to this many bytes.
    pub max_excerpt_len: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_rules: 20,
            max_excerpt_len: 240,
        }
    }
}

/// Top-level runtime configuration. Omitted sections take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Claims evaluated concurrently within one run.
    pub max_concurrency: MaxConcurrency,

    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub completion: CompletionConfig,
    pub prompt: PromptConfig,
}

/// Newtype so the default worker-pool width serdes as a plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaxConcurrency(pub usize);

impl Default for MaxConcurrency {
    fn default() -> Self {
        Self(4)
    }
}

impl MaxConcurrency {
    pub fn get(&self) -> usize {
        self.0.max(1)
    }
}
