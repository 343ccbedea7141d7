//! Configuration types
//!
//! Every tunable reads a `P8_`-prefixed environment variable with a default.
//! Binaries call `RemConfig::from_env()` once at startup and pass borrowed
//! sub-configs down; nothing else reads the environment.

use crate::{KmsProvider, RemError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Context-load tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for history replay.
    pub token_budget: i64,
    /// Messages always included regardless of budget.
    pub always_include_last: usize,
    /// Session tokens accumulated before a `session_chunk` moment is built.
    /// Zero disables compaction.
    pub moment_threshold: i64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: 8000,
            always_include_last: 6,
            moment_threshold: 4000,
        }
    }
}

impl ContextConfig {
    /// Environment variables:
    /// - `P8_CONTEXT_TOKEN_BUDGET` (default: 8000)
    /// - `P8_ALWAYS_INCLUDE_LAST_MESSAGES` (default: 6)
    /// - `P8_MOMENT_THRESHOLD_TOKENS` (default: 4000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            token_budget: env_or("P8_CONTEXT_TOKEN_BUDGET", defaults.token_budget),
            always_include_last: env_or(
                "P8_ALWAYS_INCLUDE_LAST_MESSAGES",
                defaults.always_include_last,
            ),
            moment_threshold: env_or("P8_MOMENT_THRESHOLD_TOKENS", defaults.moment_threshold),
        }
    }
}

/// Embedding/search tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: i32,
    /// Cosine-similarity floor for SEARCH results.
    pub min_similarity: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            min_similarity: 0.3,
        }
    }
}

impl EmbeddingConfig {
    /// Environment variables:
    /// - `P8_EMBEDDING_MODEL` (default: text-embedding-3-small)
    /// - `P8_EMBEDDING_DIMENSIONS` (default: 1536)
    /// - `P8_EMBEDDING_MIN_SIMILARITY` (default: 0.3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: env_string("P8_EMBEDDING_MODEL", &defaults.model),
            dimensions: env_or("P8_EMBEDDING_DIMENSIONS", defaults.dimensions),
            min_similarity: env_or("P8_EMBEDDING_MIN_SIMILARITY", defaults.min_similarity),
        }
    }
}

/// KMS/encryption tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoConfig {
    pub kms_provider: KmsProvider,
    /// Master key file for the local backend.
    pub local_key_path: String,
    /// Vault transit endpoint and key name for the vault backend.
    pub vault_addr: String,
    pub vault_transit_key: String,
    pub vault_token: Option<String>,
    /// AWS key id for the aws backend.
    pub aws_key_id: Option<String>,
    /// Plaintext DEK cache TTL.
    pub dek_cache_ttl: Duration,
    /// Bounded DEK cache capacity.
    pub dek_cache_capacity: usize,
    /// Per-call KMS deadline.
    pub kms_timeout: Duration,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kms_provider: KmsProvider::Local,
            local_key_path: ".rem/master.key".to_string(),
            vault_addr: "http://127.0.0.1:8200".to_string(),
            vault_transit_key: "rem-master".to_string(),
            vault_token: None,
            aws_key_id: None,
            dek_cache_ttl: Duration::from_secs(300),
            dek_cache_capacity: 1024,
            kms_timeout: Duration::from_secs(5),
        }
    }
}

impl CryptoConfig {
    /// Environment variables:
    /// - `P8_KMS_PROVIDER` ∈ {local, vault, aws} (default: local)
    /// - `P8_KMS_LOCAL_KEY_PATH` (default: .rem/master.key)
    /// - `P8_VAULT_ADDR`, `P8_VAULT_TRANSIT_KEY`, `P8_VAULT_TOKEN`
    /// - `P8_AWS_KMS_KEY_ID`
    /// - `P8_DEK_CACHE_TTL_SECS` (default: 300)
    /// - `P8_DEK_CACHE_CAPACITY` (default: 1024)
    /// - `P8_KMS_TIMEOUT_SECS` (default: 5)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            kms_provider: env_or("P8_KMS_PROVIDER", defaults.kms_provider),
            local_key_path: env_string("P8_KMS_LOCAL_KEY_PATH", &defaults.local_key_path),
            vault_addr: env_string("P8_VAULT_ADDR", &defaults.vault_addr),
            vault_transit_key: env_string("P8_VAULT_TRANSIT_KEY", &defaults.vault_transit_key),
            vault_token: std::env::var("P8_VAULT_TOKEN").ok(),
            aws_key_id: std::env::var("P8_AWS_KMS_KEY_ID").ok(),
            dek_cache_ttl: Duration::from_secs(env_or("P8_DEK_CACHE_TTL_SECS", 300)),
            dek_cache_capacity: env_or("P8_DEK_CACHE_CAPACITY", defaults.dek_cache_capacity),
            kms_timeout: Duration::from_secs(env_or("P8_KMS_TIMEOUT_SECS", 5)),
        }
    }
}

/// Scheduler cadences and quotas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Stale-recovery sweep cadence.
    pub recovery_interval: Duration,
    /// Claims older than this are reclaimed.
    pub stale_after: Duration,
    /// Dreaming enqueuer cadence.
    pub dreaming_interval: Duration,
    /// Hour of day (UTC) at which the news enqueuer runs.
    pub news_hour_utc: u32,
    /// Queue-claim deadline.
    pub claim_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recovery_interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(900),
            dreaming_interval: Duration::from_secs(3600),
            news_hour_utc: 7,
            claim_timeout: Duration::from_secs(2),
        }
    }
}

impl SchedulerConfig {
    /// Environment variables:
    /// - `P8_QUEUE_RECOVERY_INTERVAL_SECS` (default: 300)
    /// - `P8_QUEUE_STALE_AFTER_SECS` (default: 900)
    /// - `P8_DREAMING_INTERVAL_SECS` (default: 3600)
    /// - `P8_NEWS_HOUR_UTC` (default: 7)
    /// - `P8_QUEUE_CLAIM_TIMEOUT_SECS` (default: 2)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            recovery_interval: Duration::from_secs(env_or("P8_QUEUE_RECOVERY_INTERVAL_SECS", 300)),
            stale_after: Duration::from_secs(env_or("P8_QUEUE_STALE_AFTER_SECS", 900)),
            dreaming_interval: Duration::from_secs(env_or("P8_DREAMING_INTERVAL_SECS", 3600)),
            news_hour_utc: env_or("P8_NEWS_HOUR_UTC", defaults.news_hour_utc),
            claim_timeout: Duration::from_secs(env_or("P8_QUEUE_CLAIM_TIMEOUT_SECS", 2)),
        }
    }
}

/// Master configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemConfig {
    pub database_url: String,
    pub context: ContextConfig,
    pub embedding: EmbeddingConfig,
    pub crypto: CryptoConfig,
    pub scheduler: SchedulerConfig,
}

impl RemConfig {
    /// Build from the environment. `P8_DATABASE_URL` has no usable default
    /// in production but falls back to a local dev database.
    pub fn from_env() -> Self {
        Self {
            database_url: env_string(
                "P8_DATABASE_URL",
                "postgres://postgres@localhost:5432/rem",
            ),
            context: ContextConfig::from_env(),
            embedding: EmbeddingConfig::from_env(),
            crypto: CryptoConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), RemError> {
        if self.context.token_budget <= 0 {
            return Err(RemError::Config {
                field: "context.token_budget".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.embedding.min_similarity) {
            return Err(RemError::Config {
                field: "embedding.min_similarity".to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if self.embedding.dimensions <= 0 {
            return Err(RemError::Config {
                field: "embedding.dimensions".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.scheduler.news_hour_utc > 23 {
            return Err(RemError::Config {
                field: "scheduler.news_hour_utc".to_string(),
                reason: "must be within 0..=23".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RemConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://postgres@localhost:5432/rem".to_string(),
            context: ContextConfig::default(),
            embedding: EmbeddingConfig::default(),
            crypto: CryptoConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RemConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_similarity_is_rejected() {
        let mut cfg = RemConfig::default();
        cfg.embedding.min_similarity = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_news_hour_is_rejected() {
        let mut cfg = RemConfig::default();
        cfg.scheduler.news_hour_utc = 24;
        assert!(cfg.validate().is_err());
    }
}
