use crate::error::{PipelineError, PipelineResult};
use crate::types::{GroupingPolicy, ScoreWeights};
use serde::Deserialize;
use std::path::Path;

/// Root application configuration. Loaded from environment variables
/// with the prefix `SEM_PLANNER__` and an optional TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ads: AdsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub bids: BidConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_generator_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generator_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_candidates_per_seed")]
    pub candidates_per_seed: usize,
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdsConfig {
    #[serde(default = "default_ads_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub developer_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub login_customer_id: Option<String>,
    /// Used when the brief's language has no known constant.
    #[serde(default = "default_language_constant")]
    pub language_constant: String,
    #[serde(default = "default_ads_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_ads_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_seeds")]
    pub max_seeds: usize,
    #[serde(default = "default_max_plan_keywords")]
    pub max_plan_keywords: usize,
    #[serde(default)]
    pub grouping: GroupingPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_volume_weight")]
    pub volume_weight: f64,
    #[serde(default = "default_cpc_weight")]
    pub cpc_weight: f64,
    #[serde(default = "default_confidence_weight")]
    pub confidence_weight: f64,
    #[serde(default = "default_volume_ceiling")]
    pub volume_ceiling: u64,
    #[serde(default = "default_cpc_ceiling")]
    pub cpc_ceiling: f64,
    #[serde(default)]
    pub min_search_volume: u64,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BidConfig {
    #[serde(default = "default_conversion_rate")]
    pub conversion_rate: f64,
}

// Default functions
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_generator_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_tokens() -> u32 {
    800
}
fn default_generator_timeout_ms() -> u64 {
    30_000
}
fn default_candidates_per_seed() -> usize {
    25
}
fn default_confidence() -> f64 {
    0.5
}
fn default_cache_enabled() -> bool {
    true
}
fn default_cache_ttl_secs() -> u64 {
    86_400
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_timeout_ms() -> u64 {
    15_000
}
fn default_ads_base_url() -> String {
    "https://googleads.googleapis.com/v17".to_string()
}
fn default_language_constant() -> String {
    "languageConstants/1000".to_string()
}
fn default_ads_batch_size() -> usize {
    10
}
fn default_ads_timeout_ms() -> u64 {
    15_000
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_key_prefix() -> String {
    "sem:kw".to_string()
}
fn default_max_concurrency() -> usize {
    8
}
fn default_max_seeds() -> usize {
    50
}
fn default_max_plan_keywords() -> usize {
    150
}
fn default_volume_weight() -> f64 {
    0.4
}
fn default_cpc_weight() -> f64 {
    0.3
}
fn default_confidence_weight() -> f64 {
    0.3
}
fn default_volume_ceiling() -> u64 {
    100_000
}
fn default_cpc_ceiling() -> f64 {
    20.0
}
fn default_max_words() -> usize {
    6
}
fn default_similarity_threshold() -> f32 {
    0.92
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_jitter() -> bool {
    true
}
fn default_conversion_rate() -> f64 {
    0.02
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key: None,
            model: default_generator_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_generator_timeout_ms(),
            candidates_per_seed: default_candidates_per_seed(),
            default_confidence: default_confidence(),
            cache_enabled: default_cache_enabled(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key: None,
            model: default_embedding_model(),
            dimensions: None,
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

impl Default for AdsConfig {
    fn default() -> Self {
        Self {
            base_url: default_ads_base_url(),
            developer_token: None,
            access_token: None,
            customer_id: None,
            login_customer_id: None,
            language_constant: default_language_constant(),
            batch_size: default_ads_batch_size(),
            timeout_ms: default_ads_timeout_ms(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_seeds: default_max_seeds(),
            max_plan_keywords: default_max_plan_keywords(),
            grouping: GroupingPolicy::default(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            volume_weight: default_volume_weight(),
            cpc_weight: default_cpc_weight(),
            confidence_weight: default_confidence_weight(),
            volume_ceiling: default_volume_ceiling(),
            cpc_ceiling: default_cpc_ceiling(),
            min_search_volume: 0,
            max_words: default_max_words(),
        }
    }
}

impl ScoringConfig {
    pub fn weights(&self) -> PipelineResult<ScoreWeights> {
        ScoreWeights::new(self.volume_weight, self.cpc_weight, self.confidence_weight)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl Default for BidConfig {
    fn default() -> Self {
        Self {
            conversion_rate: default_conversion_rate(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional
    /// config file. Environment values win over the file.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("SEM_PLANNER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Checks that do not depend on which providers are wired in.
    pub fn validate(&self) -> PipelineResult<()> {
        self.scoring.weights()?;
        if !(0.0..=1.0).contains(&self.dedup.similarity_threshold) {
            return Err(PipelineError::Config(format!(
                "dedup.similarity_threshold must be within [0, 1], got {}",
                self.dedup.similarity_threshold
            )));
        }
        if self.pipeline.max_concurrency == 0 {
            return Err(PipelineError::Config(
                "pipeline.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.ads.batch_size == 0 {
            return Err(PipelineError::Config(
                "ads.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
