//! Configuration management for ruchi-memory
//!
//! All configurable parameters in one place with environment variable
//! overrides. Follows the principle: sensible defaults, configurable in
//! production.

use std::env;
use tracing::info;

use crate::constants::{
    CONTEXT_TTL_SECS, DEFAULT_MIN_SCORE, DEFAULT_TOP_K, LLM_BACKOFF_INITIAL_MS,
    LLM_BACKOFF_MAX_MS, LLM_MAX_ATTEMPTS, PREFERENCES_TTL_SECS,
};

/// Retry policy for external LLM calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts before the error propagates
    pub max_attempts: u32,
    /// Initial backoff in milliseconds (doubles per attempt)
    pub initial_backoff_ms: u64,
    /// Ceiling for a single backoff sleep in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: LLM_MAX_ATTEMPTS,
            initial_backoff_ms: LLM_BACKOFF_INITIAL_MS,
            max_backoff_ms: LLM_BACKOFF_MAX_MS,
        }
    }
}

/// Core configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct Config {
    /// Tenant this process serves (default: default-tenant)
    pub tenant_id: String,

    /// OpenAI-compatible API base URL for completions and embeddings
    /// (default: http://localhost:11434/v1, an Ollama endpoint)
    pub llm_api_base: String,

    /// API key sent as a bearer token (default: empty, for local endpoints)
    pub llm_api_key: String,

    /// Completion model for extraction and relatedness checks
    pub llm_model: String,

    /// Embedding model for situational context
    pub embedding_model: String,

    /// Expected embedding dimension for the configured model
    ///
    /// Every vector returned by the embedding service is validated against
    /// this; a mismatch is a hard error, not a warning.
    pub embedding_dimension: usize,

    /// Retry policy for LLM completion/embedding calls
    pub retry: RetryConfig,

    /// TTL for cached preference lists in seconds
    pub preferences_ttl_secs: u64,

    /// TTL for cached context retrievals in seconds
    pub context_ttl_secs: u64,

    /// Default number of similar situations per retrieval
    pub retrieval_top_k: usize,

    /// Default minimum similarity score for retrieval
    pub retrieval_min_score: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tenant_id: "default-tenant".to_string(),
            llm_api_base: "http://localhost:11434/v1".to_string(),
            llm_api_key: String::new(),
            llm_model: "llama3.1:8b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimension: 768,
            retry: RetryConfig::default(),
            preferences_ttl_secs: PREFERENCES_TTL_SECS,
            context_ttl_secs: CONTEXT_TTL_SECS,
            retrieval_top_k: DEFAULT_TOP_K,
            retrieval_min_score: DEFAULT_MIN_SCORE,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)] // Environment overrides require mutable config
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RUCHI_TENANT_ID") {
            config.tenant_id = val;
        }

        if let Ok(val) = env::var("RUCHI_LLM_API_BASE") {
            config.llm_api_base = val;
        }

        if let Ok(val) = env::var("RUCHI_LLM_API_KEY") {
            config.llm_api_key = val;
        }

        if let Ok(val) = env::var("RUCHI_LLM_MODEL") {
            config.llm_model = val;
        }

        if let Ok(val) = env::var("RUCHI_EMBEDDING_MODEL") {
            config.embedding_model = val;
        }

        if let Ok(val) = env::var("RUCHI_EMBEDDING_DIM") {
            if let Ok(n) = val.parse() {
                config.embedding_dimension = n;
            }
        }

        if let Ok(val) = env::var("RUCHI_LLM_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse::<u32>() {
                config.retry.max_attempts = n.clamp(1, 10);
            }
        }

        if let Ok(val) = env::var("RUCHI_PREFS_TTL") {
            if let Ok(n) = val.parse() {
                config.preferences_ttl_secs = n;
            }
        }

        if let Ok(val) = env::var("RUCHI_CONTEXT_TTL") {
            if let Ok(n) = val.parse() {
                config.context_ttl_secs = n;
            }
        }

        if let Ok(val) = env::var("RUCHI_TOP_K") {
            if let Ok(n) = val.parse::<usize>() {
                config.retrieval_top_k = n.clamp(1, 100);
            }
        }

        if let Ok(val) = env::var("RUCHI_MIN_SCORE") {
            if let Ok(n) = val.parse::<f32>() {
                config.retrieval_min_score = n.clamp(0.0, 1.0);
            }
        }

        config
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!("   Tenant: {}", self.tenant_id);
        info!("   LLM API base: {}", self.llm_api_base);
        info!("   Completion model: {}", self.llm_model);
        info!(
            "   Embedding model: {} (dim: {})",
            self.embedding_model, self.embedding_dimension
        );
        info!(
            "   Retry: {} attempts, backoff {}..{} ms",
            self.retry.max_attempts, self.retry.initial_backoff_ms, self.retry.max_backoff_ms
        );
        info!(
            "   Cache TTLs: prefs {}s, context {}s",
            self.preferences_ttl_secs, self.context_ttl_secs
        );
        info!(
            "   Retrieval: top_k {}, min_score {:.2}",
            self.retrieval_top_k, self.retrieval_min_score
        );
    }
}

/// Environment variable documentation
#[allow(unused)] // Public API - available for CLI help output
pub fn print_env_help() {
    println!("Ruchi-Memory Configuration Environment Variables:");
    println!();
    println!("  RUCHI_TENANT_ID        - Tenant identifier (default: default-tenant)");
    println!("  RUCHI_LLM_API_BASE     - OpenAI-compatible API base (default: http://localhost:11434/v1)");
    println!("  RUCHI_LLM_API_KEY      - Bearer token for the LLM API (default: empty)");
    println!("  RUCHI_LLM_MODEL        - Completion model (default: llama3.1:8b)");
    println!("  RUCHI_EMBEDDING_MODEL  - Embedding model (default: nomic-embed-text)");
    println!("  RUCHI_EMBEDDING_DIM    - Expected embedding dimension (default: 768)");
    println!("  RUCHI_LLM_MAX_ATTEMPTS - Max attempts per LLM call (default: 3)");
    println!("  RUCHI_PREFS_TTL        - Preference cache TTL seconds (default: 300)");
    println!("  RUCHI_CONTEXT_TTL      - Context cache TTL seconds (default: 600)");
    println!("  RUCHI_TOP_K            - Similar situations per retrieval (default: 5)");
    println!("  RUCHI_MIN_SCORE        - Minimum similarity score (default: 0.7)");
    println!();
    println!("  RUST_LOG               - Log level (e.g., info, debug, trace)");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tenant_id, "default-tenant");
        assert_eq!(config.embedding_dimension, 768);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_env_override() {
        env::set_var("RUCHI_EMBEDDING_DIM", "1536");
        env::set_var("RUCHI_TOP_K", "10");

        let config = Config::from_env();
        assert_eq!(config.embedding_dimension, 1536);
        assert_eq!(config.retrieval_top_k, 10);

        env::remove_var("RUCHI_EMBEDDING_DIM");
        env::remove_var("RUCHI_TOP_K");
    }

    #[test]
    fn test_min_score_clamped() {
        env::set_var("RUCHI_MIN_SCORE", "2.5");
        let config = Config::from_env();
        assert_eq!(config.retrieval_min_score, 1.0);
        env::remove_var("RUCHI_MIN_SCORE");
    }
}
