//! # Mediquery Config
//!
//! Configuration system for the mediquery retrieval-and-verification
//! pipeline.
//!
//! Provides TOML-based configuration parsing and validation for the
//! pipeline bounds, retrieval fan-out, and LLM capability settings.
//!
//! # Configuration Schema
//!
//! The configuration file (`mediquery.toml`) supports the following sections:
//! - `[pipeline]` — retry and generation-attempt budgets
//! - `[retrieval]` — hybrid ranking weights, per-collection timeout, fan-out concurrency
//! - `[llm]` — OpenAI-compatible completion endpoint settings
//!
//! # Environment Variable Overrides
//!
//! Every config field can be overridden via environment variables using the
//! `MEDIQUERY_` prefix and `_` as section separator:
//! - `MEDIQUERY_PIPELINE_MAX_RETRIES` → `pipeline.max_retries`
//! - `MEDIQUERY_RETRIEVAL_TOP_K` → `retrieval.top_k`
//! - `MEDIQUERY_LLM_MODEL` → `llm.model`
//! - etc.

use serde::{Deserialize, Serialize};

/// Top-level mediquery configuration.
///
/// Parsed from `mediquery.toml` or constructed programmatically.
/// Environment variables with the `MEDIQUERY_` prefix override TOML values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediqueryConfig {
    /// Pipeline retry and generation budgets.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Retrieval fan-out and ranking settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// LLM completion endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Bounds for the pipeline state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum query-rewrite retries when no relevant documents surface (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum answer regenerations after a failed grounding check (default: 2).
    #[serde(default = "default_max_generation_attempts")]
    pub max_generation_attempts: u32,
    /// Maximum clarification options surfaced to the caller (default: 4).
    #[serde(default = "default_max_clarification_options")]
    pub max_clarification_options: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_generation_attempts: default_max_generation_attempts(),
            max_clarification_options: default_max_clarification_options(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_max_generation_attempts() -> u32 {
    2
}
fn default_max_clarification_options() -> usize {
    4
}

/// Retrieval fan-out and hybrid ranking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of merged results kept after ranking (default: 8).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Weight of the dense semantic similarity in the blended score (default: 0.7).
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    /// Weight of the lexical term-overlap score in the blended score (default: 0.3).
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
    /// Per-collection search timeout in milliseconds (default: 5000).
    #[serde(default = "default_collection_timeout_ms")]
    pub collection_timeout_ms: u64,
    /// Ceiling on concurrent per-collection searches.
    /// 0 means unbounded up to the collection count (default: 0).
    #[serde(default)]
    pub max_concurrency: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            collection_timeout_ms: default_collection_timeout_ms(),
            max_concurrency: 0,
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_semantic_weight() -> f32 {
    0.7
}
fn default_lexical_weight() -> f32 {
    0.3
}
fn default_collection_timeout_ms() -> u64 {
    5000
}

/// OpenAI-compatible completion endpoint configuration.
///
/// The API key is read from the environment variable named by
/// `api_key_env` so secrets never live in the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the chat-completions API (default: OpenAI).
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Name of the environment variable holding the API key (default: "OPENAI_API_KEY").
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Model identifier (default: "gpt-4o-mini").
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature for judgments and generation (default: 0.0).
    #[serde(default)]
    pub temperature: f32,
    /// Sampling temperature for query rewrites; slight creativity helps
    /// synonym expansion (default: 0.4).
    #[serde(default = "default_rewrite_temperature")]
    pub rewrite_temperature: f32,
    /// Maximum completion tokens per call (default: 1024).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// HTTP request timeout in milliseconds (default: 30000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: 0.0,
            rewrite_temperature: default_rewrite_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_rewrite_temperature() -> f32 {
    0.4
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

impl MediqueryConfig {
    /// Load configuration from a TOML file, then apply environment variable overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::parse_toml(&contents)
    }

    /// Parse configuration from a TOML string, apply env overrides, then validate.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        let mut config: MediqueryConfig = toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Variables use the `MEDIQUERY_` prefix with `_` as section separator:
    /// - `MEDIQUERY_PIPELINE_MAX_RETRIES` → `pipeline.max_retries`
    /// - `MEDIQUERY_PIPELINE_MAX_GENERATION_ATTEMPTS` → `pipeline.max_generation_attempts`
    /// - `MEDIQUERY_PIPELINE_MAX_CLARIFICATION_OPTIONS` → `pipeline.max_clarification_options`
    /// - `MEDIQUERY_RETRIEVAL_TOP_K` → `retrieval.top_k`
    /// - `MEDIQUERY_RETRIEVAL_SEMANTIC_WEIGHT` → `retrieval.semantic_weight`
    /// - `MEDIQUERY_RETRIEVAL_LEXICAL_WEIGHT` → `retrieval.lexical_weight`
    /// - `MEDIQUERY_RETRIEVAL_COLLECTION_TIMEOUT_MS` → `retrieval.collection_timeout_ms`
    /// - `MEDIQUERY_RETRIEVAL_MAX_CONCURRENCY` → `retrieval.max_concurrency`
    /// - `MEDIQUERY_LLM_API_BASE` → `llm.api_base`
    /// - `MEDIQUERY_LLM_API_KEY_ENV` → `llm.api_key_env`
    /// - `MEDIQUERY_LLM_MODEL` → `llm.model`
    /// - `MEDIQUERY_LLM_TEMPERATURE` → `llm.temperature`
    /// - `MEDIQUERY_LLM_REWRITE_TEMPERATURE` → `llm.rewrite_temperature`
    /// - `MEDIQUERY_LLM_MAX_TOKENS` → `llm.max_tokens`
    /// - `MEDIQUERY_LLM_REQUEST_TIMEOUT_MS` → `llm.request_timeout_ms`
    pub fn apply_env_overrides(&mut self) {
        // Pipeline overrides
        if let Ok(v) = std::env::var("MEDIQUERY_PIPELINE_MAX_RETRIES") {
            if let Ok(n) = v.parse::<u32>() {
                self.pipeline.max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("MEDIQUERY_PIPELINE_MAX_GENERATION_ATTEMPTS") {
            if let Ok(n) = v.parse::<u32>() {
                self.pipeline.max_generation_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("MEDIQUERY_PIPELINE_MAX_CLARIFICATION_OPTIONS") {
            if let Ok(n) = v.parse::<usize>() {
                self.pipeline.max_clarification_options = n;
            }
        }

        // Retrieval overrides
        if let Ok(v) = std::env::var("MEDIQUERY_RETRIEVAL_TOP_K") {
            if let Ok(n) = v.parse::<usize>() {
                self.retrieval.top_k = n;
            }
        }
        if let Ok(v) = std::env::var("MEDIQUERY_RETRIEVAL_SEMANTIC_WEIGHT") {
            if let Ok(w) = v.parse::<f32>() {
                self.retrieval.semantic_weight = w;
            }
        }
        if let Ok(v) = std::env::var("MEDIQUERY_RETRIEVAL_LEXICAL_WEIGHT") {
            if let Ok(w) = v.parse::<f32>() {
                self.retrieval.lexical_weight = w;
            }
        }
        if let Ok(v) = std::env::var("MEDIQUERY_RETRIEVAL_COLLECTION_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.retrieval.collection_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("MEDIQUERY_RETRIEVAL_MAX_CONCURRENCY") {
            if let Ok(n) = v.parse::<usize>() {
                self.retrieval.max_concurrency = n;
            }
        }

        // LLM overrides
        if let Ok(v) = std::env::var("MEDIQUERY_LLM_API_BASE") {
            self.llm.api_base = v;
        }
        if let Ok(v) = std::env::var("MEDIQUERY_LLM_API_KEY_ENV") {
            self.llm.api_key_env = v;
        }
        if let Ok(v) = std::env::var("MEDIQUERY_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("MEDIQUERY_LLM_TEMPERATURE") {
            if let Ok(t) = v.parse::<f32>() {
                self.llm.temperature = t;
            }
        }
        if let Ok(v) = std::env::var("MEDIQUERY_LLM_REWRITE_TEMPERATURE") {
            if let Ok(t) = v.parse::<f32>() {
                self.llm.rewrite_temperature = t;
            }
        }
        if let Ok(v) = std::env::var("MEDIQUERY_LLM_MAX_TOKENS") {
            if let Ok(n) = v.parse::<u32>() {
                self.llm.max_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("MEDIQUERY_LLM_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.llm.request_timeout_ms = ms;
            }
        }
    }

    /// Validate the configuration, returning an error describing the first
    /// problem found.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be at least 1");
        }
        if self.retrieval.semantic_weight < 0.0 || self.retrieval.lexical_weight < 0.0 {
            anyhow::bail!("retrieval ranking weights must be non-negative");
        }
        let weight_sum = self.retrieval.semantic_weight + self.retrieval.lexical_weight;
        if (weight_sum - 1.0).abs() > 0.01 {
            anyhow::bail!(
                "retrieval.semantic_weight + retrieval.lexical_weight must sum to 1.0 (got {})",
                weight_sum
            );
        }
        if self.retrieval.collection_timeout_ms == 0 {
            anyhow::bail!("retrieval.collection_timeout_ms must be greater than 0");
        }
        if self.pipeline.max_clarification_options == 0 {
            anyhow::bail!("pipeline.max_clarification_options must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
        }
        if !(0.0..=2.0).contains(&self.llm.rewrite_temperature) {
            anyhow::bail!("llm.rewrite_temperature must be in [0.0, 2.0]");
        }
        if self.llm.max_tokens == 0 {
            anyhow::bail!("llm.max_tokens must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MediqueryConfig::default();
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.pipeline.max_generation_attempts, 2);
        assert_eq!(config.pipeline.max_clarification_options, 4);
        assert_eq!(config.retrieval.top_k, 8);
        assert!((config.retrieval.semantic_weight - 0.7).abs() < f32::EPSILON);
        assert!((config.retrieval.lexical_weight - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.retrieval.collection_timeout_ms, 5000);
        assert_eq!(config.retrieval.max_concurrency, 0);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_parse_empty_toml() {
        let config = MediqueryConfig::parse_toml("").unwrap();
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.retrieval.top_k, 8);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [pipeline]
            max_retries = 5

            [retrieval]
            top_k = 12
            semantic_weight = 0.5
            lexical_weight = 0.5
        "#;
        let config = MediqueryConfig::parse_toml(toml_str).unwrap();
        assert_eq!(config.pipeline.max_retries, 5);
        // Untouched fields keep defaults
        assert_eq!(config.pipeline.max_generation_attempts, 2);
        assert_eq!(config.retrieval.top_k, 12);
        assert!((config.retrieval.semantic_weight - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(MediqueryConfig::parse_toml("this is not toml ][").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = MediqueryConfig::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbalanced_weights() {
        let mut config = MediqueryConfig::default();
        config.retrieval.semantic_weight = 0.9;
        config.retrieval.lexical_weight = 0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_weight() {
        let mut config = MediqueryConfig::default();
        config.retrieval.semantic_weight = 1.3;
        config.retrieval.lexical_weight = -0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_temperature() {
        let mut config = MediqueryConfig::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("MEDIQUERY_PIPELINE_MAX_RETRIES", "7");
        std::env::set_var("MEDIQUERY_RETRIEVAL_TOP_K", "16");
        std::env::set_var("MEDIQUERY_LLM_MODEL", "gpt-4o");

        let mut config = MediqueryConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.pipeline.max_retries, 7);
        assert_eq!(config.retrieval.top_k, 16);
        assert_eq!(config.llm.model, "gpt-4o");

        std::env::remove_var("MEDIQUERY_PIPELINE_MAX_RETRIES");
        std::env::remove_var("MEDIQUERY_RETRIEVAL_TOP_K");
        std::env::remove_var("MEDIQUERY_LLM_MODEL");
    }

    #[test]
    fn test_env_override_ignores_unparseable() {
        std::env::set_var("MEDIQUERY_PIPELINE_MAX_GENERATION_ATTEMPTS", "lots");
        let mut config = MediqueryConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.pipeline.max_generation_attempts, 2);
        std::env::remove_var("MEDIQUERY_PIPELINE_MAX_GENERATION_ATTEMPTS");
    }
}
